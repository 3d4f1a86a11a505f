//! Insight and recommendation generation over a finished aggregate.
//!
//! Rules run in a fixed order and each emits at most one insight:
//! revenue concentration, channel performance, journey complexity, then
//! underperforming creatives.

use std::collections::BTreeMap;

use attribution_core::AttributionConfig;
use serde::{Deserialize, Serialize};

use crate::aggregator::{AggregateTotals, AttributionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    ConcentrationRisk,
    TopPerformer,
    ChannelPerformance,
    ComplexJourney,
    ShortJourney,
    Underperformance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub title: String,
    pub description: String,
    /// Creatives the insight is about, best first.
    pub creative_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Revenue share, value at risk, or mean journey length depending on kind.
    pub metric: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub action: String,
    pub rationale: String,
}

pub fn generate_insights(
    results: &[AttributionResult],
    channel_revenue: &BTreeMap<String, f64>,
    totals: &AggregateTotals,
    config: &AttributionConfig,
) -> Vec<Insight> {
    let mut insights = Vec::new();
    insights.extend(concentration(results, config));
    insights.extend(channel_performance(channel_revenue));
    insights.extend(journey_complexity(totals, config));
    insights.extend(underperformance(results, config));
    insights
}

fn total_revenue(results: &[AttributionResult]) -> f64 {
    results.iter().map(|r| r.revenue).sum()
}

/// Results arrive sorted by revenue, so the first is the top creative.
fn concentration(results: &[AttributionResult], config: &AttributionConfig) -> Option<Insight> {
    let top = results.first()?;
    let total = total_revenue(results);
    if total <= 0.0 {
        return None;
    }
    let share = top.revenue / total;
    let insight = if share > config.concentration_threshold {
        Insight {
            kind: InsightKind::ConcentrationRisk,
            title: "Revenue concentration risk".into(),
            description: format!(
                "Creative {} drives {:.1}% of attributed revenue; a single fatigued creative could stall results.",
                top.creative_id,
                share * 100.0
            ),
            creative_ids: vec![top.creative_id.clone()],
            channel: None,
            metric: share,
        }
    } else {
        Insight {
            kind: InsightKind::TopPerformer,
            title: "Top performing creative".into(),
            description: format!(
                "Creative {} leads with ${:.2} attributed revenue ({:.1}% of total).",
                top.creative_id,
                top.revenue,
                share * 100.0
            ),
            creative_ids: vec![top.creative_id.clone()],
            channel: None,
            metric: share,
        }
    };
    Some(insight)
}

fn channel_performance(channel_revenue: &BTreeMap<String, f64>) -> Option<Insight> {
    let total: f64 = channel_revenue.values().sum();
    if total <= 0.0 {
        return None;
    }
    // Ties resolve to the alphabetically first channel.
    let (channel, revenue) = channel_revenue
        .iter()
        .fold(None::<(&String, f64)>, |best, (c, r)| match best {
            Some((_, br)) if br >= *r => best,
            _ => Some((c, *r)),
        })?;
    let share = revenue / total;
    Some(Insight {
        kind: InsightKind::ChannelPerformance,
        title: format!("{channel} is the strongest channel"),
        description: format!(
            "{channel} earned ${revenue:.2} of attributed revenue ({:.1}% across {} channels).",
            share * 100.0,
            channel_revenue.len()
        ),
        creative_ids: Vec::new(),
        channel: Some(channel.clone()),
        metric: share,
    })
}

fn journey_complexity(totals: &AggregateTotals, config: &AttributionConfig) -> Option<Insight> {
    if totals.journeys == 0 {
        return None;
    }
    let mean = totals.mean_journey_length();
    if mean > config.complex_journey_threshold {
        Some(Insight {
            kind: InsightKind::ComplexJourney,
            title: "Complex customer journeys".into(),
            description: format!(
                "Journeys average {mean:.1} touchpoints; customers need sustained nurturing before converting."
            ),
            creative_ids: Vec::new(),
            channel: None,
            metric: mean,
        })
    } else if mean < config.short_journey_threshold {
        Some(Insight {
            kind: InsightKind::ShortJourney,
            title: "Short customer journeys".into(),
            description: format!(
                "Journeys average {mean:.1} touchpoints; customers decide quickly."
            ),
            creative_ids: Vec::new(),
            channel: None,
            metric: mean,
        })
    } else {
        None
    }
}

fn underperformance(results: &[AttributionResult], config: &AttributionConfig) -> Option<Insight> {
    let flagged: Vec<&AttributionResult> = results
        .iter()
        .filter(|r| r.impressions > 0 && r.ctr < config.ctr_floor)
        .collect();
    if flagged.is_empty() {
        return None;
    }
    let at_risk: f64 = flagged
        .iter()
        .map(|r| r.revenue * config.value_at_risk_fraction)
        .sum();
    Some(Insight {
        kind: InsightKind::Underperformance,
        title: format!("{} creative(s) below CTR floor", flagged.len()),
        description: format!(
            "Click-through rate is under {:.2}% for {}; an estimated ${at_risk:.2} of attributed revenue is at risk.",
            config.ctr_floor * 100.0,
            flagged
                .iter()
                .map(|r| r.creative_id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        creative_ids: flagged.iter().map(|r| r.creative_id.clone()).collect(),
        channel: None,
        metric: at_risk,
    })
}

/// Scaling the top performer comes first, then one recommendation per insight.
pub fn generate_recommendations(
    insights: &[Insight],
    results: &[AttributionResult],
) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    if let Some(top) = results.first().filter(|r| r.revenue > 0.0) {
        recs.push(Recommendation {
            priority: Priority::High,
            action: format!("Scale budget behind creative {}", top.creative_id),
            rationale: format!(
                "It carries the most attributed revenue (${:.2}) under this model.",
                top.revenue
            ),
        });
    }

    for insight in insights {
        let rec = match insight.kind {
            InsightKind::ConcentrationRisk => Some(Recommendation {
                priority: Priority::High,
                action: "Diversify creative mix with fresh variants".into(),
                rationale: format!(
                    "{:.1}% of revenue depends on one creative.",
                    insight.metric * 100.0
                ),
            }),
            InsightKind::TopPerformer => None,
            InsightKind::ChannelPerformance => insight.channel.as_ref().map(|channel| Recommendation {
                priority: Priority::Medium,
                action: format!("Shift incremental spend toward {channel}"),
                rationale: insight.description.clone(),
            }),
            InsightKind::ComplexJourney => Some(Recommendation {
                priority: Priority::Medium,
                action: "Build nurture sequences for multi-step journeys".into(),
                rationale: insight.description.clone(),
            }),
            InsightKind::ShortJourney => Some(Recommendation {
                priority: Priority::Medium,
                action: "Lean on direct-response creative and clear calls to action".into(),
                rationale: insight.description.clone(),
            }),
            InsightKind::Underperformance => Some(Recommendation {
                priority: Priority::High,
                action: format!(
                    "Refresh or retarget low-CTR creatives: {}",
                    insight.creative_ids.join(", ")
                ),
                rationale: format!("${:.2} of attributed revenue at risk.", insight.metric),
            }),
        };
        recs.extend(rec);
    }

    recs
}
