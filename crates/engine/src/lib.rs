//! Multi-touch attribution: journey assembly, weighting strategies, credit
//! aggregation, insights, and report building over closed time windows.

pub mod aggregator;
pub mod export;
pub mod insights;
pub mod journey;
pub mod markov;
pub mod report;
pub mod shapley;
pub mod store;
pub mod strategy;
pub mod synth;

pub use aggregator::{AttributionResult, CampaignAttribution, CreditAggregator};
pub use insights::{Insight, InsightKind, Recommendation};
pub use journey::{assemble_journeys, ConversionPath, Journey};
pub use report::{
    AnalysisRequest, AttributionEngine, AttributionReport, CancellationFlag, ModelComparison,
    ReportSummary,
};
pub use store::TouchpointStore;
pub use strategy::{WeightingContext, Weights};
