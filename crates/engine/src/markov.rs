//! First-order Markov chain over channels, used for removal-effect attribution.
//!
//! States are `start`, one per channel, and two absorbing states: `conversion`
//! and `null`. Each journey is cut into walks `start → ch₁ → … → chₖ`. A
//! conversion touchpoint closes the walk into `conversion` and the next touch
//! starts a new walk. Trailing touches with no conversion close into `null`.
//!
//! The conversion probability is the absorption probability into `conversion`
//! from `start`, solved by fixed-point iteration from zero.
//!
//! Removing a channel excises it from every observed walk and refits the chain,
//! so its neighbours connect directly (`a → removed → b` becomes `a → b`). A walk
//! left with no channels goes straight from `start` to `null`.

use std::collections::BTreeMap;

use attribution_core::Touchpoint;
use tracing::debug;

use crate::journey::Journey;
use crate::strategy::{normalize, Weights};

const START: usize = 0;
const CONVERSION: usize = 1;
const NULL: usize = 2;
const FIRST_CHANNEL: usize = 3;

const MAX_ITERATIONS: usize = 10_000;
const TOLERANCE: f64 = 1e-12;

type Counts = BTreeMap<(usize, usize), u64>;

/// One observed run of channel states and the absorbing state it ended in.
#[derive(Debug, Clone)]
struct Walk {
    states: Vec<usize>,
    end: usize,
}

/// Transition counts between chain states, plus the walks they came from.
#[derive(Debug, Clone, Default)]
pub struct TransitionMatrix {
    channels: Vec<String>,
    index: BTreeMap<String, usize>,
    walks: Vec<Walk>,
    counts: Counts,
}

impl TransitionMatrix {
    pub fn from_journeys<'a, 'j, I>(journeys: I) -> Self
    where
        'a: 'j,
        I: IntoIterator<Item = &'j Journey<'a>>,
    {
        let mut matrix = Self::default();
        for journey in journeys {
            matrix.observe(&journey.touchpoints);
        }
        matrix.counts = count_walks(&matrix.walks, None);
        debug!(
            channels = matrix.channels.len(),
            walks = matrix.walks.len(),
            transitions = matrix.transition_count(),
            "Markov transition matrix built"
        );
        matrix
    }

    fn state_for(&mut self, channel: &str) -> usize {
        if let Some(&idx) = self.index.get(channel) {
            return idx;
        }
        let idx = FIRST_CHANNEL + self.channels.len();
        self.channels.push(channel.to_string());
        self.index.insert(channel.to_string(), idx);
        idx
    }

    fn observe(&mut self, touchpoints: &[&Touchpoint]) {
        let mut states = Vec::new();
        for t in touchpoints {
            if t.is_conversion() {
                if !states.is_empty() {
                    self.walks.push(Walk {
                        states: std::mem::take(&mut states),
                        end: CONVERSION,
                    });
                }
                continue;
            }
            let state = self.state_for(&t.platform);
            states.push(state);
        }
        if !states.is_empty() {
            self.walks.push(Walk { states, end: NULL });
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn transition_count(&self) -> u64 {
        self.counts.values().sum()
    }

    fn state_count(&self) -> usize {
        FIRST_CHANNEL + self.channels.len()
    }

    /// Observed transition probability between two channels (or `None` if
    /// either channel is unknown).
    pub fn transition_probability(&self, from: &str, to: &str) -> Option<f64> {
        let from = *self.index.get(from)?;
        let to = *self.index.get(to)?;
        let rows = rows(&self.counts, self.state_count());
        rows[from].iter().find(|(t, _)| *t == to).map(|(_, p)| *p).or(Some(0.0))
    }

    /// Probability of absorbing into `conversion` from `start`, with
    /// `removed` excised from every walk.
    pub fn conversion_probability(&self, removed: Option<&str>) -> f64 {
        match removed {
            None => absorb(&rows(&self.counts, self.state_count())),
            Some(channel) => match self.index.get(channel) {
                Some(&state) => self.probability_without(state),
                None => absorb(&rows(&self.counts, self.state_count())),
            },
        }
    }

    fn probability_without(&self, state: usize) -> f64 {
        let counts = count_walks(&self.walks, Some(state));
        absorb(&rows(&counts, self.state_count()))
    }

    /// `baseline − P(without channel)` for every channel. Computed once per
    /// analysis.
    pub fn removal_effects(&self) -> RemovalEffects {
        let baseline = absorb(&rows(&self.counts, self.state_count()));
        let by_channel = self
            .channels
            .iter()
            .enumerate()
            .map(|(i, channel)| {
                let without = self.probability_without(FIRST_CHANNEL + i);
                (channel.clone(), baseline - without)
            })
            .collect();
        RemovalEffects {
            baseline,
            by_channel,
        }
    }
}

fn count_walks(walks: &[Walk], removed: Option<usize>) -> Counts {
    let mut counts = Counts::new();
    for walk in walks {
        let mut prev = START;
        for &state in walk.states.iter().filter(|s| Some(**s) != removed) {
            *counts.entry((prev, state)).or_insert(0) += 1;
            prev = state;
        }
        let end = if prev == START { NULL } else { walk.end };
        *counts.entry((prev, end)).or_insert(0) += 1;
    }
    counts
}

/// Row-normalized transition probabilities, indexed by state.
fn rows(counts: &Counts, states: usize) -> Vec<Vec<(usize, f64)>> {
    let mut totals = vec![0u64; states];
    for (&(from, _), &count) in counts {
        totals[from] += count;
    }
    let mut rows = vec![Vec::new(); states];
    for (&(from, to), &count) in counts {
        rows[from].push((to, count as f64 / totals[from] as f64));
    }
    rows
}

fn absorb(rows: &[Vec<(usize, f64)>]) -> f64 {
    let mut p = vec![0.0; rows.len()];
    p[CONVERSION] = 1.0;
    for _ in 0..MAX_ITERATIONS {
        let mut next = p.clone();
        let mut delta = 0.0f64;
        for (state, row) in rows.iter().enumerate() {
            if state == CONVERSION || state == NULL {
                continue;
            }
            let value: f64 = row.iter().map(|(to, prob)| prob * p[*to]).sum();
            delta = delta.max((value - p[state]).abs());
            next[state] = value;
        }
        p = next;
        if delta < TOLERANCE {
            break;
        }
    }
    p[START]
}

/// Per-channel removal effects for one analysed journey set.
#[derive(Debug, Clone, Default)]
pub struct RemovalEffects {
    pub baseline: f64,
    pub by_channel: BTreeMap<String, f64>,
}

impl RemovalEffects {
    pub fn effect(&self, channel: &str) -> f64 {
        self.by_channel.get(channel).copied().unwrap_or(0.0)
    }

    pub fn is_degenerate(&self) -> bool {
        self.baseline <= 0.0 || self.by_channel.values().all(|e| e.abs() <= f64::EPSILON)
    }

    /// `|effect(channel)|` per touchpoint, normalized; linear when degenerate.
    pub fn weights(&self, path: &[&Touchpoint]) -> Weights {
        if self.is_degenerate() {
            return Weights::fallback(path.len());
        }
        let raw: Vec<f64> = path.iter().map(|t| self.effect(&t.platform).abs()).collect();
        match normalize(raw) {
            Some(values) => Weights {
                values,
                fallback_used: false,
            },
            None => Weights::fallback(path.len()),
        }
    }
}
