pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, AttributionConfig, MissingValuePolicy};
pub use error::{AttributionError, AttributionOutcome};
pub use types::{
    AttributionModel, RawTouchpoint, TimeRange, Touchpoint, TouchpointMetadata, TouchpointType,
};
