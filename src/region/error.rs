use thiserror::Error;

/// Failure of the external fetch capability.
///
/// Cloneable so that one failed in-flight load can be handed to every
/// caller that was awaiting it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// Resource could not be read or reached
    #[error("Failed to fetch '{url}': {message}")]
    Unavailable { url: String, message: String },

    /// Resource was read but is not valid JSON
    #[error("Invalid JSON in '{url}': {message}")]
    InvalidJson { url: String, message: String },
}

/// Errors that can occur while configuring providers or matching regions
#[derive(Debug, Error)]
pub enum RegionError {
    /// Configuration error (duplicate region types, bad regexes, malformed documents)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The region ID list for a provider could not be loaded
    #[error("Load error: {0}")]
    Load(String),

    /// Network or file failure while loading a resource
    #[error("Region mapping unavailable: {0}")]
    Fetch(#[from] FetchError),

    /// Matching was attempted before `load_region_ids` completed
    #[error("Region provider '{0}' is not ready to match regions")]
    NotLoaded(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Results using RegionError
pub type Result<T> = std::result::Result<T, RegionError>;
