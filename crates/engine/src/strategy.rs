//! Weighting strategies — one per attribution model, dispatched over
//! [`AttributionModel`]. Every strategy maps an ordered path to non-negative
//! weights that sum to 1.

use attribution_core::{AttributionConfig, AttributionModel, Touchpoint};

use crate::markov::RemovalEffects;
use crate::shapley;

/// Credit weights for one conversion path, index-aligned with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Weights {
    pub values: Vec<f64>,
    /// The model degenerated and linear weights were substituted.
    pub fallback_used: bool,
}

impl Weights {
    fn exact(values: Vec<f64>) -> Self {
        Self {
            values,
            fallback_used: false,
        }
    }

    pub fn fallback(n: usize) -> Self {
        Self {
            values: linear(n),
            fallback_used: true,
        }
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }
}

/// Read-only inputs shared by every path in one analysis run.
#[derive(Debug, Clone, Copy)]
pub struct WeightingContext<'a> {
    pub config: &'a AttributionConfig,
    /// Required by the Markov model; built once over all journeys.
    pub removal_effects: Option<&'a RemovalEffects>,
}

impl<'a> WeightingContext<'a> {
    pub fn new(config: &'a AttributionConfig) -> Self {
        Self {
            config,
            removal_effects: None,
        }
    }

    pub fn with_removal_effects(mut self, effects: &'a RemovalEffects) -> Self {
        self.removal_effects = Some(effects);
        self
    }
}

/// Weights for `path` under `model`. An empty path yields an empty vector.
pub fn compute_weights(
    model: AttributionModel,
    path: &[&Touchpoint],
    ctx: &WeightingContext<'_>,
) -> Weights {
    let n = path.len();
    match n {
        0 => return Weights::exact(Vec::new()),
        1 => return Weights::exact(vec![1.0]),
        _ => {}
    }

    match model {
        AttributionModel::FirstTouch => Weights::exact(first_touch(n)),
        AttributionModel::LastTouch => Weights::exact(last_touch(n)),
        AttributionModel::Linear => Weights::exact(linear(n)),
        AttributionModel::TimeDecay => time_decay(path, ctx.config.half_life_ms()),
        AttributionModel::PositionBased => Weights::exact(position_based(n)),
        AttributionModel::ShapleyValue => shapley::shapley_weights(path, ctx.config),
        AttributionModel::MarkovChain => match ctx.removal_effects {
            Some(effects) => effects.weights(path),
            None => Weights::fallback(n),
        },
        AttributionModel::DataDriven => data_driven(path, ctx.config),
    }
}

pub fn first_touch(n: usize) -> Vec<f64> {
    let mut w = vec![0.0; n];
    if let Some(first) = w.first_mut() {
        *first = 1.0;
    }
    w
}

pub fn last_touch(n: usize) -> Vec<f64> {
    let mut w = vec![0.0; n];
    if let Some(last) = w.last_mut() {
        *last = 1.0;
    }
    w
}

pub fn linear(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    vec![1.0 / n as f64; n]
}

/// 40% first, 40% last, 20% spread over the middle.
pub fn position_based(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        2 => vec![0.5, 0.5],
        _ => {
            let interior = 0.2 / (n - 2) as f64;
            let mut w = vec![interior; n];
            w[0] = 0.4;
            w[n - 1] = 0.4;
            w
        }
    }
}

/// `exp(-Δt / half_life)` where Δt is measured back from the last touch.
fn time_decay(path: &[&Touchpoint], half_life_ms: f64) -> Weights {
    let Some(last) = path.last() else {
        return Weights::exact(Vec::new());
    };
    let raw: Vec<f64> = path
        .iter()
        .map(|t| {
            let dt = (last.timestamp - t.timestamp).num_milliseconds().max(0) as f64;
            (-dt / half_life_ms).exp()
        })
        .collect();
    normalize(raw).map_or_else(|| Weights::fallback(path.len()), Weights::exact)
}

/// Interaction value × channel multiplier, ramped toward the conversion.
fn data_driven(path: &[&Touchpoint], config: &AttributionConfig) -> Weights {
    let n = path.len() as f64;
    let raw: Vec<f64> = path
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let recency = 1.0 + i as f64 / n;
            config.interaction_value(t.touchpoint_type)
                * config.channel_multiplier(&t.platform)
                * recency
        })
        .collect();
    normalize(raw).map_or_else(|| Weights::fallback(path.len()), Weights::exact)
}

/// Scales `raw` to sum to 1. `None` when the total is zero or not finite.
pub(crate) fn normalize(raw: Vec<f64>) -> Option<Vec<f64>> {
    let total: f64 = raw.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return None;
    }
    Some(raw.into_iter().map(|w| w.max(0.0) / total).collect())
}
