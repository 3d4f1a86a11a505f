//! Report export — CSV (one row per creative) and pretty JSON.

use attribution_core::AttributionOutcome;

use crate::report::AttributionReport;

pub const CSV_COLUMNS: [&str; 7] = [
    "creativeId",
    "campaignId",
    "weight",
    "revenue",
    "conversions",
    "ctr",
    "conversionRate",
];

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub fn to_csv(report: &AttributionReport) -> String {
    let mut csv = CSV_COLUMNS.join(",");
    csv.push('\n');
    for r in &report.results {
        let cells = [
            quote(&r.creative_id),
            quote(&r.campaign_id),
            format!("{:.6}", r.weight),
            format!("{:.2}", r.revenue),
            format!("{:.6}", r.conversions),
            format!("{:.6}", r.ctr),
            format!("{:.6}", r.conversion_rate),
        ];
        csv.push_str(&cells.join(","));
        csv.push('\n');
    }
    csv
}

pub fn to_json(report: &AttributionReport) -> AttributionOutcome<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
