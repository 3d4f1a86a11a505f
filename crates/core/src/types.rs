use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AttributionError, AttributionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchpointType {
    Impression,
    Click,
    Conversion,
}

/// Optional context captured with a touchpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TouchpointMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

/// A validated, immutable interaction event.
///
/// `value` is only ever set on conversions; the ingestion path enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Touchpoint {
    pub id: String,
    pub user_id: String,
    pub creative_id: String,
    pub campaign_id: String,
    pub platform: String,
    #[serde(rename = "type")]
    pub touchpoint_type: TouchpointType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default)]
    pub metadata: TouchpointMetadata,
}

impl Touchpoint {
    pub fn is_conversion(&self) -> bool {
        self.touchpoint_type == TouchpointType::Conversion
    }
}

/// Touchpoint as received at the ingestion edge, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTouchpoint {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub creative_id: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(rename = "type", default)]
    pub touchpoint_type: Option<TouchpointType>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub metadata: TouchpointMetadata,
}

impl From<Touchpoint> for RawTouchpoint {
    fn from(t: Touchpoint) -> Self {
        Self {
            id: Some(t.id),
            user_id: Some(t.user_id),
            creative_id: Some(t.creative_id),
            campaign_id: Some(t.campaign_id),
            platform: Some(t.platform),
            touchpoint_type: Some(t.touchpoint_type),
            timestamp: Some(t.timestamp),
            value: t.value,
            metadata: t.metadata,
        }
    }
}

/// Closed analysis window; both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> AttributionOutcome<Self> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> AttributionOutcome<()> {
        if self.start > self.end {
            return Err(AttributionError::InvalidInput(format!(
                "time range start {} is after end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }
}

// ─── Attribution Models ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionModel {
    FirstTouch,
    LastTouch,
    Linear,
    TimeDecay,
    PositionBased,
    ShapleyValue,
    MarkovChain,
    /// Heuristic stand-in; nothing here is trained.
    DataDriven,
}

impl AttributionModel {
    pub const ALL: [AttributionModel; 8] = [
        AttributionModel::FirstTouch,
        AttributionModel::LastTouch,
        AttributionModel::Linear,
        AttributionModel::TimeDecay,
        AttributionModel::PositionBased,
        AttributionModel::ShapleyValue,
        AttributionModel::MarkovChain,
        AttributionModel::DataDriven,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionModel::FirstTouch => "first_touch",
            AttributionModel::LastTouch => "last_touch",
            AttributionModel::Linear => "linear",
            AttributionModel::TimeDecay => "time_decay",
            AttributionModel::PositionBased => "position_based",
            AttributionModel::ShapleyValue => "shapley_value",
            AttributionModel::MarkovChain => "markov_chain",
            AttributionModel::DataDriven => "data_driven",
        }
    }
}

impl fmt::Display for AttributionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributionModel {
    type Err = AttributionError;

    /// Accepts snake_case, kebab-case and a few short aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let model = match normalized.as_str() {
            "first_touch" | "first" => AttributionModel::FirstTouch,
            "last_touch" | "last" => AttributionModel::LastTouch,
            "linear" => AttributionModel::Linear,
            "time_decay" => AttributionModel::TimeDecay,
            "position_based" | "u_shaped" => AttributionModel::PositionBased,
            "shapley_value" | "shapley" => AttributionModel::ShapleyValue,
            "markov_chain" | "markov" => AttributionModel::MarkovChain,
            "data_driven" => AttributionModel::DataDriven,
            _ => {
                return Err(AttributionError::InvalidInput(format!(
                    "unknown attribution model: {s}"
                )))
            }
        };
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn model_names_round_trip_through_from_str() {
        for model in AttributionModel::ALL {
            assert_eq!(model.as_str().parse::<AttributionModel>().unwrap(), model);
        }
        assert_eq!(
            "Shapley-Value".parse::<AttributionModel>().unwrap(),
            AttributionModel::ShapleyValue
        );
    }

    #[test]
    fn unknown_model_is_invalid_input() {
        let err = "last_click_wins".parse::<AttributionModel>().unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn time_range_rejects_inverted_window() {
        let now = Utc::now();
        assert!(TimeRange::new(now, now - Duration::seconds(1)).is_err());
        let range = TimeRange::new(now, now).unwrap();
        assert!(range.contains(now));
    }

    #[test]
    fn touchpoint_type_field_is_named_type() {
        let json = serde_json::json!({
            "id": "t1",
            "user_id": "u1",
            "creative_id": "cr1",
            "campaign_id": "c1",
            "platform": "google",
            "type": "click",
            "timestamp": "2024-03-01T10:00:00Z"
        });
        let tp: Touchpoint = serde_json::from_value(json).unwrap();
        assert_eq!(tp.touchpoint_type, TouchpointType::Click);
        assert!(tp.value.is_none());
        assert!(!tp.is_conversion());
    }
}
