use thiserror::Error;

/// Failures at the I/O edges of the crate. The planning core itself never
/// errors; bad telemetry degrades to empty or absent results instead.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("failed to read telemetry csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, StrategyError>;
