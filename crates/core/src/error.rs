use thiserror::Error;

pub type AttributionOutcome<T> = Result<T, AttributionError>;

#[derive(Error, Debug)]
pub enum AttributionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid touchpoint: {0}")]
    InvalidTouchpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Model {model} failed: {reason}")]
    ModelFailure { model: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AttributionError {
    fn from(err: config::ConfigError) -> Self {
        AttributionError::Config(err.to_string())
    }
}

impl AttributionError {
    /// Input errors are surfaced to the caller as-is and never retried.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            AttributionError::InvalidInput(_) | AttributionError::InvalidTouchpoint(_)
        )
    }
}
