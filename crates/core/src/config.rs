use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{AttributionError, AttributionOutcome};
use crate::types::{AttributionModel, TouchpointType};

/// Hard ceiling for `max_touchpoints`. Shapley enumerates `2^n` coalitions.
pub const MAX_SHAPLEY_PLAYERS: usize = 20;

/// Root application configuration. Loaded from an optional TOML file, then
/// environment variables with the prefix `CAMPAIGN_ATTRIBUTION__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub attribution: AttributionConfig,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("CAMPAIGN_ATTRIBUTION")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            attribution: AttributionConfig::default(),
        }
    }
}

/// What to do with a conversion that arrives without a monetary value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingValuePolicy {
    /// Credit `default_conversion_value`.
    #[default]
    DefaultValue,
    /// Refuse the record at ingestion.
    Reject,
}

// ─── Attribution Config ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AttributionConfig {
    #[serde(default = "default_model")]
    pub default_model: AttributionModel,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
    #[serde(default = "default_max_touchpoints")]
    pub max_touchpoints: usize,
    #[serde(default = "default_conversion_value")]
    pub default_conversion_value: f64,
    #[serde(default)]
    pub missing_value_policy: MissingValuePolicy,
    #[serde(default = "default_ctr_floor")]
    pub ctr_floor: f64,
    #[serde(default = "default_concentration_threshold")]
    pub concentration_threshold: f64,
    #[serde(default = "default_complex_journey_threshold")]
    pub complex_journey_threshold: f64,
    #[serde(default = "default_short_journey_threshold")]
    pub short_journey_threshold: f64,
    #[serde(default = "default_value_at_risk_fraction")]
    pub value_at_risk_fraction: f64,
    #[serde(default = "default_click_value")]
    pub click_value: f64,
    #[serde(default = "default_impression_value")]
    pub impression_value: f64,
    /// Keyed by lowercase platform label.
    #[serde(default = "default_channel_multipliers")]
    pub channel_multipliers: BTreeMap<String, f64>,
    #[serde(default = "default_aggregation_chunk_size")]
    pub aggregation_chunk_size: usize,
}

fn default_log_filter() -> String {
    "campaign_attribution=info,attribution_engine=info".to_string()
}
fn default_model() -> AttributionModel {
    AttributionModel::Linear
}
fn default_half_life_days() -> f64 {
    7.0
}
fn default_max_touchpoints() -> usize {
    10
}
fn default_conversion_value() -> f64 {
    50.0
}
fn default_ctr_floor() -> f64 {
    0.015
}
fn default_concentration_threshold() -> f64 {
    0.5
}
fn default_complex_journey_threshold() -> f64 {
    6.0
}
fn default_short_journey_threshold() -> f64 {
    2.0
}
fn default_value_at_risk_fraction() -> f64 {
    0.3
}
fn default_click_value() -> f64 {
    2.0
}
fn default_impression_value() -> f64 {
    1.0
}
fn default_channel_multipliers() -> BTreeMap<String, f64> {
    [
        ("google", 1.2),
        ("facebook", 1.0),
        ("instagram", 0.95),
        ("tiktok", 0.85),
        ("linkedin", 1.1),
        ("twitter", 0.9),
        ("email", 1.3),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}
fn default_aggregation_chunk_size() -> usize {
    256
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            half_life_days: default_half_life_days(),
            max_touchpoints: default_max_touchpoints(),
            default_conversion_value: default_conversion_value(),
            missing_value_policy: MissingValuePolicy::default(),
            ctr_floor: default_ctr_floor(),
            concentration_threshold: default_concentration_threshold(),
            complex_journey_threshold: default_complex_journey_threshold(),
            short_journey_threshold: default_short_journey_threshold(),
            value_at_risk_fraction: default_value_at_risk_fraction(),
            click_value: default_click_value(),
            impression_value: default_impression_value(),
            channel_multipliers: default_channel_multipliers(),
            aggregation_chunk_size: default_aggregation_chunk_size(),
        }
    }
}

impl AttributionConfig {
    /// Unknown platforms get a neutral multiplier of 1.
    pub fn channel_multiplier(&self, platform: &str) -> f64 {
        self.channel_multipliers
            .get(&platform.trim().to_ascii_lowercase())
            .copied()
            .unwrap_or(1.0)
    }

    /// Base coalition value of a single touchpoint, before the channel multiplier.
    pub fn interaction_value(&self, kind: TouchpointType) -> f64 {
        match kind {
            TouchpointType::Click => self.click_value,
            TouchpointType::Impression => self.impression_value,
            TouchpointType::Conversion => 0.0,
        }
    }

    pub fn half_life_ms(&self) -> f64 {
        self.half_life_days * 24.0 * 3600.0 * 1000.0
    }

    pub fn validate(&self) -> AttributionOutcome<()> {
        if !(self.half_life_days.is_finite() && self.half_life_days > 0.0) {
            return Err(AttributionError::Config(format!(
                "half_life_days must be positive, got {}",
                self.half_life_days
            )));
        }
        if self.max_touchpoints == 0 || self.max_touchpoints > MAX_SHAPLEY_PLAYERS {
            return Err(AttributionError::Config(format!(
                "max_touchpoints must be within 1..={MAX_SHAPLEY_PLAYERS}, got {}",
                self.max_touchpoints
            )));
        }
        if !(self.default_conversion_value.is_finite() && self.default_conversion_value >= 0.0) {
            return Err(AttributionError::Config(
                "default_conversion_value must be non-negative".into(),
            ));
        }
        for (name, value) in [
            ("ctr_floor", self.ctr_floor),
            ("concentration_threshold", self.concentration_threshold),
            ("value_at_risk_fraction", self.value_at_risk_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AttributionError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.short_journey_threshold > self.complex_journey_threshold {
            return Err(AttributionError::Config(
                "short_journey_threshold exceeds complex_journey_threshold".into(),
            ));
        }
        if self.click_value < 0.0 || self.impression_value < 0.0 {
            return Err(AttributionError::Config(
                "interaction values must be non-negative".into(),
            ));
        }
        if let Some((channel, m)) = self
            .channel_multipliers
            .iter()
            .find(|(_, m)| !(m.is_finite() && **m >= 0.0))
        {
            return Err(AttributionError::Config(format!(
                "channel multiplier for {channel} must be non-negative, got {m}"
            )));
        }
        if self.aggregation_chunk_size == 0 {
            return Err(AttributionError::Config(
                "aggregation_chunk_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
