//! Append-only touchpoint store — the validated ingestion edge of the engine.

use std::collections::{BTreeSet, HashSet};

use attribution_core::config::MissingValuePolicy;
use attribution_core::{AttributionError, AttributionOutcome, RawTouchpoint, TimeRange, Touchpoint};
use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct StoreInner {
    events: Vec<Touchpoint>,
    ids: HashSet<String>,
}

/// Result of a batch ingestion.
#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub accepted: usize,
    /// `(index in batch, reason)` for each refused record.
    pub rejected: Vec<(usize, String)>,
}

/// Insertion order is preserved; it is the tie-breaker for equal timestamps
/// when journeys are assembled.
#[derive(Debug)]
pub struct TouchpointStore {
    inner: RwLock<StoreInner>,
    policy: MissingValuePolicy,
}

impl TouchpointStore {
    pub fn new(policy: MissingValuePolicy) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            policy,
        }
    }

    /// Validates one record and appends it. Returns the stored id.
    pub fn ingest(&self, raw: RawTouchpoint) -> AttributionOutcome<String> {
        let touchpoint = match validate(raw, self.policy) {
            Ok(t) => t,
            Err(e) => {
                metrics::counter!("attribution.touchpoints.rejected").increment(1);
                return Err(e);
            }
        };

        let mut inner = self.inner.write();
        if !inner.ids.insert(touchpoint.id.clone()) {
            metrics::counter!("attribution.touchpoints.rejected").increment(1);
            return Err(AttributionError::InvalidTouchpoint(format!(
                "duplicate touchpoint id {}",
                touchpoint.id
            )));
        }
        let id = touchpoint.id.clone();
        debug!(touchpoint_id = %id, user_id = %touchpoint.user_id, "Touchpoint ingested");
        inner.events.push(touchpoint);
        metrics::counter!("attribution.touchpoints.ingested").increment(1);
        Ok(id)
    }

    /// Ingests every record, collecting rejections instead of stopping at the first.
    pub fn ingest_batch<I>(&self, records: I) -> IngestSummary
    where
        I: IntoIterator<Item = RawTouchpoint>,
    {
        let mut summary = IngestSummary::default();
        for (idx, raw) in records.into_iter().enumerate() {
            match self.ingest(raw) {
                Ok(_) => summary.accepted += 1,
                Err(e) => {
                    warn!(index = idx, error = %e, "Rejected touchpoint");
                    summary.rejected.push((idx, e.to_string()));
                }
            }
        }
        summary
    }

    /// Immutable copy of everything ingested so far, in ingestion order.
    pub fn snapshot(&self) -> Vec<Touchpoint> {
        self.inner.read().events.clone()
    }

    /// Touchpoints for the given campaigns inside the window, in ingestion order.
    pub fn query(&self, campaign_ids: &BTreeSet<String>, range: &TimeRange) -> Vec<Touchpoint> {
        self.inner
            .read()
            .events
            .iter()
            .filter(|t| campaign_ids.contains(&t.campaign_id) && range.contains(t.timestamp))
            .cloned()
            .collect()
    }

    pub fn campaign_ids(&self) -> BTreeSet<String> {
        self.inner
            .read()
            .events
            .iter()
            .map(|t| t.campaign_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TouchpointStore {
    fn default() -> Self {
        Self::new(MissingValuePolicy::default())
    }
}

fn required(field: Option<String>, name: &str) -> AttributionOutcome<String> {
    match field {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AttributionError::InvalidTouchpoint(format!("missing {name}"))),
    }
}

fn validate(raw: RawTouchpoint, policy: MissingValuePolicy) -> AttributionOutcome<Touchpoint> {
    let user_id = required(raw.user_id, "user_id")?;
    let creative_id = required(raw.creative_id, "creative_id")?;
    let timestamp = raw
        .timestamp
        .ok_or_else(|| AttributionError::InvalidTouchpoint("missing timestamp".into()))?;
    let campaign_id = required(raw.campaign_id, "campaign_id")?;
    let touchpoint_type = raw
        .touchpoint_type
        .ok_or_else(|| AttributionError::InvalidTouchpoint("missing type".into()))?;

    let is_conversion = touchpoint_type == attribution_core::TouchpointType::Conversion;
    match raw.value {
        Some(_) if !is_conversion => {
            return Err(AttributionError::InvalidTouchpoint(
                "value is only allowed on conversions".into(),
            ))
        }
        Some(v) if !(v.is_finite() && v >= 0.0) => {
            return Err(AttributionError::InvalidTouchpoint(format!(
                "conversion value must be a non-negative amount, got {v}"
            )))
        }
        None if is_conversion && policy == MissingValuePolicy::Reject => {
            return Err(AttributionError::InvalidTouchpoint(
                "conversion is missing a value".into(),
            ))
        }
        _ => {}
    }

    let id = raw
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let platform = raw
        .platform
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    Ok(Touchpoint {
        id,
        user_id,
        creative_id,
        campaign_id,
        platform,
        touchpoint_type,
        timestamp,
        value: raw.value,
        metadata: raw.metadata,
    })
}
