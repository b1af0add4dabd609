use thiserror::Error;

/// Errors that can occur while building color maps, legends or table columns
#[derive(Debug, Error)]
pub enum LegendError {
    /// A CSS color string could not be parsed
    #[error("Invalid color '{0}'")]
    InvalidColor(String),

    /// A color map has no stops or malformed offsets
    #[error("Invalid color map: {0}")]
    InvalidColorMap(String),

    /// Column data could not be read from a data frame
    #[error("Data frame error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Results using LegendError
pub type Result<T> = std::result::Result<T, LegendError>;
