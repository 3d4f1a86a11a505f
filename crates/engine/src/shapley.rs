//! Shapley-value credit assignment by exhaustive coalition enumeration.
//!
//! Each touchpoint is a player. The coalition value function is
//! `v(S) = Σ value_i × channelMultiplier(platform_i)`, and a player's Shapley
//! value is its marginal contribution averaged over every subset of the other
//! players, weighted by `|S|!(n-|S|-1)!/n!`. Cost is `O(n · 2^n)`, so paths are
//! cut to the `max_touchpoints` most recent touches first.

use attribution_core::{AttributionConfig, Touchpoint};
use tracing::debug;

use crate::strategy::{normalize, Weights};

pub fn shapley_weights(path: &[&Touchpoint], config: &AttributionConfig) -> Weights {
    let n = path.len();
    let cut = n.saturating_sub(config.max_touchpoints);
    if cut > 0 {
        debug!(
            path_len = n,
            max_touchpoints = config.max_touchpoints,
            "Truncating path for Shapley enumeration"
        );
    }

    let players: Vec<f64> = path[cut..]
        .iter()
        .map(|t| config.interaction_value(t.touchpoint_type) * config.channel_multiplier(&t.platform))
        .collect();

    let phi = shapley_values(&players);
    let Some(share) = normalize(phi) else {
        return Weights::fallback(n);
    };

    let mut values = vec![0.0; cut];
    values.extend(share);
    Weights {
        values,
        fallback_used: false,
    }
}

/// Shapley values for an additive game over `players`.
pub fn shapley_values(players: &[f64]) -> Vec<f64> {
    let coalitions = coalition_values(players);
    shapley_from_coalitions(players.len(), &coalitions)
}

/// `v(mask)` for every subset, built incrementally from the lowest set bit.
fn coalition_values(players: &[f64]) -> Vec<f64> {
    let total = 1usize << players.len();
    let mut v = vec![0.0; total];
    for mask in 1..total {
        let low = mask.trailing_zeros() as usize;
        v[mask] = v[mask & (mask - 1)] + players[low];
    }
    v
}

/// Generic enumeration over a precomputed coalition table of length `2^n`.
pub fn shapley_from_coalitions(n: usize, v: &[f64]) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let subset_weights = subset_weights(n);
    let mut phi = vec![0.0; n];
    for (i, phi_i) in phi.iter_mut().enumerate() {
        let bit = 1usize << i;
        for mask in 0..v.len() {
            if mask & bit != 0 {
                continue;
            }
            let size = mask.count_ones() as usize;
            *phi_i += subset_weights[size] * (v[mask | bit] - v[mask]);
        }
    }
    phi
}

/// `s!(n-s-1)!/n!`, written as `1 / (n · C(n-1, s))` to stay in range.
fn subset_weights(n: usize) -> Vec<f64> {
    let mut binom = 1.0f64;
    let mut weights = Vec::with_capacity(n);
    for s in 0..n {
        if s > 0 {
            binom = binom * (n - s) as f64 / s as f64;
        }
        weights.push(1.0 / (n as f64 * binom));
    }
    weights
}
