//! Error types for device twin operations.

use thiserror::Error;

/// All errors produced while validating, merging or parsing a twin.
///
/// Every variant except [`TwinError::Callback`] is raised before any state is
/// touched, so a failed call leaves the twin exactly as it was.
#[derive(Debug, Error)]
pub enum TwinError {
    // Validation errors
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("value for '{key}' is nested deeper than {max_depth} levels")]
    DepthExceeded { key: String, max_depth: usize },

    // State errors
    #[error("{0} not enabled")]
    FeatureDisabled(&'static str),

    #[error("a status change requires a status reason")]
    MissingReason,

    #[error("nothing to update")]
    NoChange,

    // Document errors
    #[error("ambiguous twin document: {0}")]
    AmbiguousShape(String),

    #[error("duplicate section '{0}'")]
    DuplicateSection(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A registered change callback failed after the change was applied
    #[error("change callback failed: {0}")]
    Callback(anyhow::Error),
}

impl TwinError {
    pub(crate) fn invalid_key(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_value(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for twin operations.
pub type Result<T> = std::result::Result<T, TwinError>;
