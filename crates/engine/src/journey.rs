//! Journey assembly — groups a touchpoint snapshot by user into time-ordered
//! journeys and extracts the conversion path behind each conversion.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use attribution_core::{TimeRange, Touchpoint};

/// One user's touchpoints inside the analysis window, sorted by timestamp.
///
/// Borrows from the snapshot handed to [`assemble_journeys`]; nothing outlives
/// the analysis call.
#[derive(Debug, Clone)]
pub struct Journey<'a> {
    pub user_id: &'a str,
    pub touchpoints: Vec<&'a Touchpoint>,
}

/// The non-conversion touchpoints that precede (or coincide with) one conversion.
#[derive(Debug, Clone)]
pub struct ConversionPath<'a> {
    pub conversion: &'a Touchpoint,
    pub touchpoints: Vec<&'a Touchpoint>,
}

impl<'a> Journey<'a> {
    pub fn len(&self) -> usize {
        self.touchpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.touchpoints.is_empty()
    }

    pub fn conversions(&self) -> impl Iterator<Item = &'a Touchpoint> + '_ {
        self.touchpoints.iter().copied().filter(|t| t.is_conversion())
    }

    /// One path per conversion. Conversions with nothing before them are dropped.
    pub fn conversion_paths(&self) -> Vec<ConversionPath<'a>> {
        self.conversions()
            .filter_map(|conversion| {
                let touchpoints: Vec<&'a Touchpoint> = self
                    .touchpoints
                    .iter()
                    .copied()
                    .filter(|t| !t.is_conversion() && t.timestamp <= conversion.timestamp)
                    .collect();
                (!touchpoints.is_empty()).then_some(ConversionPath {
                    conversion,
                    touchpoints,
                })
            })
            .collect()
    }
}

impl ConversionPath<'_> {
    pub fn len(&self) -> usize {
        self.touchpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.touchpoints.is_empty()
    }

    /// Seconds from the first touch to the conversion.
    pub fn time_to_purchase_secs(&self) -> f64 {
        self.touchpoints
            .first()
            .map(|first| {
                (self.conversion.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0
            })
            .unwrap_or(0.0)
    }
}

/// Builds a fresh user → journey map over `touchpoints`.
///
/// Keeps touchpoints whose campaign is in `campaign_ids` and whose timestamp is
/// inside `range`. Equal timestamps keep snapshot order. A repeated touchpoint
/// id is kept only once per journey.
pub fn assemble_journeys<'a>(
    touchpoints: &'a [Touchpoint],
    campaign_ids: &BTreeSet<String>,
    range: &TimeRange,
) -> BTreeMap<String, Journey<'a>> {
    let mut journeys: BTreeMap<String, Journey<'a>> = BTreeMap::new();
    let mut seen: HashSet<(&'a str, &'a str)> = HashSet::new();

    for t in touchpoints {
        if !campaign_ids.contains(&t.campaign_id) || !range.contains(t.timestamp) {
            continue;
        }
        if !seen.insert((t.user_id.as_str(), t.id.as_str())) {
            continue;
        }
        journeys
            .entry(t.user_id.clone())
            .or_insert_with(|| Journey {
                user_id: t.user_id.as_str(),
                touchpoints: Vec::new(),
            })
            .touchpoints
            .push(t);
    }

    for journey in journeys.values_mut() {
        // Stable: equal timestamps stay in ingestion order.
        journey.touchpoints.sort_by_key(|t| t.timestamp);
    }

    journeys
}

#[cfg(test)]
mod tests {
    use super::*;
    use attribution_core::{TouchpointMetadata, TouchpointType};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn tp(id: &str, user: &str, campaign: &str, kind: TouchpointType, hours: i64) -> Touchpoint {
        Touchpoint {
            id: id.into(),
            user_id: user.into(),
            creative_id: format!("cr_{id}"),
            campaign_id: campaign.into(),
            platform: "google".into(),
            touchpoint_type: kind,
            timestamp: base() + Duration::hours(hours),
            value: (kind == TouchpointType::Conversion).then_some(100.0),
            metadata: TouchpointMetadata::default(),
        }
    }

    fn campaigns(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn window() -> TimeRange {
        TimeRange::new(base(), base() + Duration::days(30)).unwrap()
    }

    #[test]
    fn test_groups_by_user_and_sorts() {
        let data = vec![
            tp("b", "u1", "c1", TouchpointType::Click, 5),
            tp("a", "u1", "c1", TouchpointType::Impression, 1),
            tp("x", "u2", "c1", TouchpointType::Impression, 2),
        ];
        let journeys = assemble_journeys(&data, &campaigns(&["c1"]), &window());
        assert_eq!(journeys.len(), 2);
        let ids: Vec<&str> = journeys["u1"].touchpoints.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_equal_timestamps_keep_ingestion_order() {
        let data = vec![
            tp("first", "u1", "c1", TouchpointType::Impression, 3),
            tp("second", "u1", "c1", TouchpointType::Click, 3),
            tp("third", "u1", "c1", TouchpointType::Impression, 3),
        ];
        let journeys = assemble_journeys(&data, &campaigns(&["c1"]), &window());
        let ids: Vec<&str> = journeys["u1"].touchpoints.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_filters_campaign_window_and_duplicates() {
        let data = vec![
            tp("a", "u1", "c1", TouchpointType::Impression, 1),
            tp("a", "u1", "c1", TouchpointType::Impression, 1),
            tp("b", "u1", "c2", TouchpointType::Impression, 2),
            tp("c", "u1", "c1", TouchpointType::Impression, -1),
            tp("d", "u1", "c1", TouchpointType::Impression, 24 * 30),
        ];
        let journeys = assemble_journeys(&data, &campaigns(&["c1"]), &window());
        let ids: Vec<&str> = journeys["u1"].touchpoints.iter().map(|t| t.id.as_str()).collect();
        // Window end is inclusive.
        assert_eq!(ids, vec!["a", "d"]);
    }

    #[test]
    fn test_no_match_is_empty_map() {
        let data = vec![tp("a", "u1", "c9", TouchpointType::Impression, 1)];
        assert!(assemble_journeys(&data, &campaigns(&["c1"]), &window()).is_empty());
    }

    #[test]
    fn test_conversion_paths() {
        let data = vec![
            tp("imp", "u1", "c1", TouchpointType::Impression, 0),
            tp("click", "u1", "c1", TouchpointType::Click, 2),
            tp("conv1", "u1", "c1", TouchpointType::Conversion, 3),
            tp("imp2", "u1", "c1", TouchpointType::Impression, 5),
            tp("conv2", "u1", "c1", TouchpointType::Conversion, 6),
        ];
        let journeys = assemble_journeys(&data, &campaigns(&["c1"]), &window());
        let paths = journeys["u1"].conversion_paths();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].len(), 2);
        // Touchpoints count toward every later conversion.
        assert_eq!(paths[1].len(), 3);
        assert_eq!(paths[0].time_to_purchase_secs(), 3.0 * 3600.0);
    }

    #[test]
    fn test_conversion_without_prior_touch_has_no_path() {
        let data = vec![
            tp("conv", "u1", "c1", TouchpointType::Conversion, 1),
            tp("late", "u1", "c1", TouchpointType::Click, 4),
        ];
        let journeys = assemble_journeys(&data, &campaigns(&["c1"]), &window());
        assert!(journeys["u1"].conversion_paths().is_empty());
    }
}
