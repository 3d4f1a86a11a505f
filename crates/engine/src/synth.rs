//! Seeded synthetic touchpoint generator for fixtures, demos and load tests.
//!
//! This is the only place in the crate that uses randomness; analysis never
//! calls into it.

use attribution_core::{Touchpoint, TouchpointMetadata, TouchpointType};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

const PLATFORMS: [&str; 6] = ["google", "facebook", "instagram", "tiktok", "email", "linkedin"];
const DEVICES: [&str; 3] = ["desktop", "mobile", "tablet"];

#[derive(Debug, Clone)]
pub struct SynthSpec {
    pub seed: u64,
    pub users: usize,
    pub campaigns: usize,
    pub creatives_per_campaign: usize,
    pub start: DateTime<Utc>,
    pub days: i64,
    pub max_touches: usize,
    /// Probability that a journey ends in a conversion.
    pub conversion_rate: f64,
}

impl SynthSpec {
    pub fn new(seed: u64, users: usize, start: DateTime<Utc>) -> Self {
        Self {
            seed,
            users,
            campaigns: 3,
            creatives_per_campaign: 4,
            start,
            days: 30,
            max_touches: 8,
            conversion_rate: 0.35,
        }
    }

    pub fn campaign_ids(&self) -> Vec<String> {
        (0..self.campaigns).map(|c| format!("campaign_{c:02}")).collect()
    }
}

/// Same `SynthSpec`, same output.
pub fn generate(spec: &SynthSpec) -> Vec<Touchpoint> {
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let campaigns = spec.campaign_ids();
    let window_secs = (spec.days * 86_400).max(1);
    let mut out = Vec::new();

    if campaigns.is_empty() || spec.creatives_per_campaign == 0 {
        return out;
    }

    for u in 0..spec.users {
        let user_id = format!("user_{u:05}");
        let touches = rng.gen_range(1..=spec.max_touches.max(1));
        let first = rng.gen_range(0..window_secs);
        let mut at = spec.start + Duration::seconds(first);
        let device = DEVICES[rng.gen_range(0..DEVICES.len())];

        let mut last: Option<(String, String, String)> = None;
        for position in 0..touches {
            let campaign = &campaigns[rng.gen_range(0..campaigns.len())];
            let creative = format!("{campaign}_cr{}", rng.gen_range(0..spec.creatives_per_campaign));
            let platform = PLATFORMS[rng.gen_range(0..PLATFORMS.len())];
            let kind = if rng.gen_bool(0.3) {
                TouchpointType::Click
            } else {
                TouchpointType::Impression
            };
            out.push(Touchpoint {
                id: Uuid::from_u128(rng.gen()).to_string(),
                user_id: user_id.clone(),
                creative_id: creative.clone(),
                campaign_id: campaign.clone(),
                platform: platform.to_string(),
                touchpoint_type: kind,
                timestamp: at,
                value: None,
                metadata: TouchpointMetadata {
                    device: Some(device.to_string()),
                    position: Some(position as u32),
                },
            });
            last = Some((campaign.clone(), creative, platform.to_string()));
            at += Duration::minutes(rng.gen_range(5..=2 * 24 * 60));
        }

        if let Some((campaign, creative, platform)) = last {
            if rng.gen_bool(spec.conversion_rate.clamp(0.0, 1.0)) {
                let value = (rng.gen_range(20.0..300.0_f64) * 100.0).round() / 100.0;
                out.push(Touchpoint {
                    id: Uuid::from_u128(rng.gen()).to_string(),
                    user_id: user_id.clone(),
                    creative_id: creative,
                    campaign_id: campaign,
                    platform,
                    touchpoint_type: TouchpointType::Conversion,
                    timestamp: at,
                    value: Some(value),
                    metadata: TouchpointMetadata {
                        device: Some(device.to_string()),
                        position: None,
                    },
                });
            }
        }
    }

    out
}
