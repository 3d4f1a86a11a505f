//! Attribution engine entry points — single-model analysis and concurrent
//! model comparison.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use attribution_core::{
    AttributionConfig, AttributionError, AttributionModel, AttributionOutcome, TimeRange,
    Touchpoint,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregator::{AttributionResult, CampaignAttribution, CreditAggregator};
use crate::insights::{generate_insights, generate_recommendations, Insight, Recommendation};
use crate::journey::assemble_journeys;
use crate::markov::{RemovalEffects, TransitionMatrix};
use crate::strategy::WeightingContext;

// ─── Types ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub campaign_ids: BTreeSet<String>,
    pub model: AttributionModel,
    pub time_range: TimeRange,
    /// Optional spend per campaign; enables ROI.
    #[serde(default)]
    pub spend: BTreeMap<String, f64>,
}

impl AnalysisRequest {
    pub fn new<I, S>(campaign_ids: I, model: AttributionModel, time_range: TimeRange) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            campaign_ids: campaign_ids.into_iter().map(Into::into).collect(),
            model,
            time_range,
            spend: BTreeMap::new(),
        }
    }

    pub fn with_spend(mut self, campaign_id: impl Into<String>, amount: f64) -> Self {
        self.spend.insert(campaign_id.into(), amount);
        self
    }

    pub fn validate(&self) -> AttributionOutcome<()> {
        if self.campaign_ids.is_empty() {
            return Err(AttributionError::InvalidInput(
                "at least one campaign id is required".into(),
            ));
        }
        self.time_range.validate()?;
        if let Some((campaign, amount)) = self.spend.iter().find(|(_, s)| !(s.is_finite() && **s >= 0.0)) {
            return Err(AttributionError::InvalidInput(format!(
                "spend for campaign {campaign} must be non-negative, got {amount}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_revenue: f64,
    pub total_conversions: f64,
    pub total_spend: Option<f64>,
    pub roi: Option<f64>,
    pub journeys: u64,
    pub mean_journey_length: f64,
    pub conversion_paths: u64,
    pub skipped_conversions: u64,
    /// Paths where the model degenerated and linear weights were used.
    pub fallback_paths: u64,
}

impl ReportSummary {
    pub fn fallback_used(&self) -> bool {
        self.fallback_paths > 0
    }
}

/// Read-only result of one analysis run. Contains no ids or clocks, so the
/// same inputs always produce an equal report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionReport {
    pub model: AttributionModel,
    pub time_range: TimeRange,
    pub campaign_ids: Vec<String>,
    pub results: Vec<AttributionResult>,
    pub campaigns: Vec<CampaignAttribution>,
    pub channel_revenue: BTreeMap<String, f64>,
    pub summary: ReportSummary,
    pub insights: Vec<Insight>,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelComparison {
    pub reports: BTreeMap<AttributionModel, AttributionReport>,
    /// Models that failed, with the reason. Never also present in `reports`.
    pub failures: BTreeMap<AttributionModel, String>,
}

impl ModelComparison {
    pub fn revenue_by_model(&self) -> BTreeMap<AttributionModel, f64> {
        self.reports
            .iter()
            .map(|(m, r)| (*m, r.summary.total_revenue))
            .collect()
    }

    /// Max minus min attributed revenue per creative across successful models,
    /// summed over the campaigns it ran in. A creative missing from a model's
    /// report counts as zero there.
    pub fn creative_spread(&self) -> BTreeMap<String, f64> {
        let creatives: BTreeSet<&str> = self
            .reports
            .values()
            .flat_map(|r| r.results.iter().map(|c| c.creative_id.as_str()))
            .collect();
        creatives
            .into_iter()
            .map(|creative| {
                let revenues: Vec<f64> = self
                    .reports
                    .values()
                    .map(|r| {
                        r.results
                            .iter()
                            .filter(|c| c.creative_id == creative)
                            .map(|c| c.revenue)
                            .sum::<f64>()
                    })
                    .collect();
                let max = revenues.iter().copied().fold(f64::MIN, f64::max);
                let min = revenues.iter().copied().fold(f64::MAX, f64::min);
                (creative.to_string(), max - min)
            })
            .collect()
    }
}

/// Shared flag checked by in-flight analyses between journeys.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Raises the flag when the owning comparison future is dropped.
struct CancelOnDrop(CancellationFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

// ─── Engine ─────────────────────────────────────────────────────────────────

/// Stateless apart from its configuration; every call works on the snapshot
/// it is handed.
#[derive(Debug, Clone)]
pub struct AttributionEngine {
    config: Arc<AttributionConfig>,
}

impl AttributionEngine {
    pub fn new(config: AttributionConfig) -> AttributionOutcome<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    /// Runs one model over `touchpoints` for the requested campaigns and window.
    pub fn analyze(
        &self,
        touchpoints: &[Touchpoint],
        request: &AnalysisRequest,
    ) -> AttributionOutcome<AttributionReport> {
        request.validate()?;
        self.run(touchpoints, request, &CancellationFlag::new())
    }

    fn run(
        &self,
        touchpoints: &[Touchpoint],
        request: &AnalysisRequest,
        cancel: &CancellationFlag,
    ) -> AttributionOutcome<AttributionReport> {
        let started = Instant::now();
        let config = self.config.as_ref();
        let journeys = assemble_journeys(touchpoints, &request.campaign_ids, &request.time_range);

        let effects: Option<RemovalEffects> = (request.model == AttributionModel::MarkovChain)
            .then(|| TransitionMatrix::from_journeys(journeys.values()).removal_effects());
        let mut ctx = WeightingContext::new(config);
        if let Some(effects) = effects.as_ref() {
            ctx = ctx.with_removal_effects(effects);
        }

        let aggregate = CreditAggregator::new(request.model, ctx, cancel)
            .aggregate(&journeys, &request.spend)?;

        let insights = generate_insights(
            &aggregate.results,
            &aggregate.channel_revenue,
            &aggregate.totals,
            config,
        );
        let recommendations = generate_recommendations(&insights, &aggregate.results);

        let totals = &aggregate.totals;
        let total_spend = (!request.spend.is_empty()).then(|| request.spend.values().sum::<f64>());
        let summary = ReportSummary {
            total_revenue: totals.revenue,
            total_conversions: totals.conversions,
            roi: total_spend
                .filter(|s| *s > 0.0)
                .map(|s| (totals.revenue - s) / s),
            total_spend,
            journeys: totals.journeys,
            mean_journey_length: totals.mean_journey_length(),
            conversion_paths: totals.conversion_paths,
            skipped_conversions: totals.skipped_conversions,
            fallback_paths: totals.fallback_paths,
        };

        if summary.fallback_used() {
            metrics::counter!("attribution.fallbacks").increment(summary.fallback_paths);
            warn!(
                model = %request.model,
                fallback_paths = summary.fallback_paths,
                "Model degenerated on some paths; linear weights substituted"
            );
        }
        metrics::counter!("attribution.reports").increment(1);
        metrics::histogram!("attribution.analyze.latency_us")
            .record(started.elapsed().as_micros() as f64);

        info!(
            model = %request.model,
            journeys = summary.journeys,
            paths = summary.conversion_paths,
            creatives = aggregate.results.len(),
            revenue = summary.total_revenue,
            "Attribution complete"
        );

        Ok(AttributionReport {
            model: request.model,
            time_range: request.time_range,
            campaign_ids: request.campaign_ids.iter().cloned().collect(),
            results: aggregate.results,
            campaigns: aggregate.campaigns,
            channel_revenue: aggregate.channel_revenue,
            summary,
            insights,
            recommendations,
        })
    }

    /// Runs every supported model concurrently over the same snapshot.
    ///
    /// A model that errors or panics is logged and recorded in
    /// `failures`; the rest still report. Dropping the returned future
    /// cancels the analyses still running.
    pub async fn compare_models(
        &self,
        touchpoints: Arc<[Touchpoint]>,
        campaign_ids: BTreeSet<String>,
        time_range: TimeRange,
        spend: BTreeMap<String, f64>,
    ) -> AttributionOutcome<ModelComparison> {
        let base = AnalysisRequest {
            campaign_ids,
            model: self.config.default_model,
            time_range,
            spend,
        };
        let engine = self.clone();
        self.compare_with(&base, &AttributionModel::ALL, move |request, cancel| {
            engine.run(&touchpoints, request, cancel)
        })
        .await
    }

    async fn compare_with<F>(
        &self,
        base: &AnalysisRequest,
        models: &[AttributionModel],
        run: F,
    ) -> AttributionOutcome<ModelComparison>
    where
        F: Fn(&AnalysisRequest, &CancellationFlag) -> AttributionOutcome<AttributionReport>
            + Send
            + Sync
            + 'static,
    {
        base.validate()?;

        let run = Arc::new(run);
        let guard = CancelOnDrop(CancellationFlag::new());
        let handles: Vec<_> = models
            .iter()
            .map(|&model| {
                let run = Arc::clone(&run);
                let cancel = guard.0.clone();
                let request = AnalysisRequest {
                    model,
                    ..base.clone()
                };
                let handle = tokio::task::spawn_blocking(move || {
                    catch_unwind(AssertUnwindSafe(|| (*run)(&request, &cancel))).unwrap_or_else(|_| {
                        Err(AttributionError::ModelFailure {
                            model: model.to_string(),
                            reason: "analysis panicked".into(),
                        })
                    })
                });
                (model, handle)
            })
            .collect();

        let mut comparison = ModelComparison::default();
        for (model, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| {
                Err(AttributionError::ModelFailure {
                    model: model.to_string(),
                    reason: e.to_string(),
                })
            });
            match outcome {
                Ok(report) => {
                    comparison.reports.insert(model, report);
                }
                Err(e) => {
                    metrics::counter!("attribution.model_failures").increment(1);
                    warn!(model = %model, error = %e, "Model failed during comparison");
                    comparison.failures.insert(model, e.to_string());
                }
            }
        }

        info!(
            succeeded = comparison.reports.len(),
            failed = comparison.failures.len(),
            "Model comparison complete"
        );
        drop(guard);
        Ok(comparison)
    }
}

impl Default for AttributionEngine {
    fn default() -> Self {
        Self {
            config: Arc::new(AttributionConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attribution_core::{TouchpointMetadata, TouchpointType};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
    }

    fn tp(id: &str, creative: &str, platform: &str, kind: TouchpointType, minutes: i64) -> Touchpoint {
        Touchpoint {
            id: id.into(),
            user_id: "u1".into(),
            creative_id: creative.into(),
            campaign_id: "c1".into(),
            platform: platform.into(),
            touchpoint_type: kind,
            timestamp: base() + Duration::minutes(minutes),
            value: (kind == TouchpointType::Conversion).then_some(100.0),
            metadata: TouchpointMetadata::default(),
        }
    }

    fn data() -> Vec<Touchpoint> {
        vec![
            tp("t1", "fb_ad", "Facebook", TouchpointType::Impression, 0),
            tp("t2", "g_ad", "Google", TouchpointType::Click, 120),
            tp("t3", "g_ad", "Google", TouchpointType::Conversion, 180),
        ]
    }

    fn window() -> TimeRange {
        TimeRange::new(base(), base() + Duration::days(1)).unwrap()
    }

    #[test]
    fn test_empty_campaign_set_is_invalid() {
        let engine = AttributionEngine::default();
        let request = AnalysisRequest::new(Vec::<String>::new(), AttributionModel::Linear, window());
        let err = engine.analyze(&data(), &request).unwrap_err();
        assert!(matches!(err, AttributionError::InvalidInput(_)));
    }

    #[test]
    fn test_inverted_range_is_invalid() {
        let engine = AttributionEngine::default();
        let request = AnalysisRequest::new(
            ["c1"],
            AttributionModel::Linear,
            TimeRange {
                start: base() + Duration::days(1),
                end: base(),
            },
        );
        assert!(engine.analyze(&data(), &request).unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AttributionConfig {
            max_touchpoints: 0,
            ..Default::default()
        };
        assert!(AttributionEngine::new(config).is_err());
    }

    #[test]
    fn test_summary_roi() {
        let engine = AttributionEngine::default();
        let request = AnalysisRequest::new(["c1"], AttributionModel::Linear, window()).with_spend("c1", 25.0);
        let report = engine.analyze(&data(), &request).unwrap();
        assert_eq!(report.summary.total_spend, Some(25.0));
        assert!((report.summary.roi.unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(report.summary.journeys, 1);
        assert!(!report.summary.fallback_used());
    }

    #[test]
    fn test_markov_credits_the_indispensable_channel() {
        let engine = AttributionEngine::default();
        let mut touchpoints = data();
        // A second user converts on Facebook alone; Google is never needed.
        touchpoints.push(Touchpoint {
            user_id: "u2".into(),
            ..tp("u2-imp", "fb_ad", "Facebook", TouchpointType::Impression, 0)
        });
        touchpoints.push(Touchpoint {
            user_id: "u2".into(),
            ..tp("u2-buy", "fb_ad", "Facebook", TouchpointType::Conversion, 30)
        });
        let request = AnalysisRequest::new(["c1"], AttributionModel::MarkovChain, window());
        let report = engine.analyze(&touchpoints, &request).unwrap();

        let revenue = |creative: &str| {
            report
                .results
                .iter()
                .find(|r| r.creative_id == creative)
                .map_or(0.0, |r| r.revenue)
        };
        assert!((revenue("fb_ad") - 200.0).abs() < 1e-9);
        assert!(revenue("g_ad").abs() < 1e-9);
        assert!(!report.summary.fallback_used());
    }

    #[test]
    fn test_markov_single_journey_falls_back_to_linear() {
        let engine = AttributionEngine::default();
        let request = AnalysisRequest::new(["c1"], AttributionModel::MarkovChain, window());
        let report = engine.analyze(&data(), &request).unwrap();
        // Skipping either channel still leaves a converting walk.
        for r in &report.results {
            assert!((r.revenue - 50.0).abs() < 1e-9);
        }
        assert_eq!(report.summary.fallback_paths, 1);
    }

    #[test]
    fn test_degenerate_shapley_is_flagged() {
        let mut config = AttributionConfig::default();
        config.channel_multipliers.insert("facebook".into(), 0.0);
        config.channel_multipliers.insert("google".into(), 0.0);
        let engine = AttributionEngine::new(config).unwrap();
        let request = AnalysisRequest::new(["c1"], AttributionModel::ShapleyValue, window());
        let report = engine.analyze(&data(), &request).unwrap();
        assert_eq!(report.summary.fallback_paths, 1);
        assert!(report.summary.fallback_used());
        for r in &report.results {
            assert!((r.weight - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_markov_with_no_converting_paths_is_empty() {
        let engine = AttributionEngine::default();
        let mut touchpoints = data();
        // u1 never converts once t3 is gone, and u2's only touch is a conversion
        // with nothing before it.
        touchpoints.push(Touchpoint {
            user_id: "u2".into(),
            ..tp("x1", "x_ad", "Email", TouchpointType::Conversion, 10)
        });
        touchpoints.retain(|t| t.id != "t3");
        let request = AnalysisRequest::new(["c1"], AttributionModel::MarkovChain, window());
        let report = engine.analyze(&touchpoints, &request).unwrap();
        assert!(report.results.is_empty());
        assert_eq!(report.summary.skipped_conversions, 1);
    }

    #[tokio::test]
    async fn test_compare_models_covers_every_model() {
        let engine = AttributionEngine::default();
        let campaigns: BTreeSet<String> = ["c1".to_string()].into_iter().collect();
        let comparison = engine
            .compare_models(data().into(), campaigns, window(), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(comparison.reports.len(), AttributionModel::ALL.len());
        assert!(comparison.failures.is_empty());
        for revenue in comparison.revenue_by_model().values() {
            assert!((revenue - 100.0).abs() < 1e-9);
        }
        let spread = comparison.creative_spread();
        // First touch gives fb_ad everything, last touch gives it nothing.
        assert!((spread["fb_ad"] - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_compare_isolates_failing_model() {
        let engine = AttributionEngine::default();
        let touchpoints: Arc<[Touchpoint]> = data().into();
        let runner = engine.clone();
        let base = AnalysisRequest::new(["c1"], AttributionModel::Linear, window());
        let comparison = engine
            .compare_with(&base, &AttributionModel::ALL, move |request, cancel| {
                match request.model {
                    AttributionModel::ShapleyValue => Err(AttributionError::Internal(
                        anyhow::anyhow!("simulated coalition failure"),
                    )),
                    AttributionModel::MarkovChain => panic!("simulated panic"),
                    _ => runner.run(&touchpoints, request, cancel),
                }
            })
            .await
            .unwrap();

        assert_eq!(comparison.reports.len(), AttributionModel::ALL.len() - 2);
        assert!(!comparison.reports.contains_key(&AttributionModel::ShapleyValue));
        assert!(!comparison.reports.contains_key(&AttributionModel::MarkovChain));
        assert!(comparison.failures.contains_key(&AttributionModel::ShapleyValue));
        assert!(comparison.failures.contains_key(&AttributionModel::MarkovChain));
    }

    #[tokio::test]
    async fn test_compare_rejects_empty_campaigns_before_running() {
        let engine = AttributionEngine::default();
        let err = engine
            .compare_models(data().into(), BTreeSet::new(), window(), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[tokio::test]
    async fn test_dropping_comparison_cancels_in_flight_runs() {
        let engine = AttributionEngine::default();
        let base = AnalysisRequest::new(["c1"], AttributionModel::Linear, window());
        let observed = CancellationFlag::new();
        let seen = observed.clone();
        let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
        let started_tx = std::sync::Mutex::new(started_tx);

        let fut = engine.compare_with(&base, &[AttributionModel::Linear], move |_, cancel| {
            let _ = started_tx.lock().map(|tx| tx.send(()));
            while !cancel.is_cancelled() {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            seen.cancel();
            Err(AttributionError::Cancelled)
        });

        let mut fut = Box::pin(fut);
        tokio::select! {
            _ = &mut fut => panic!("comparison should still be running"),
            _ = tokio::task::spawn_blocking(move || started_rx.recv()) => {}
        }
        drop(fut);

        for _ in 0..1_000 {
            if observed.is_cancelled() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert!(observed.is_cancelled());
    }
}
