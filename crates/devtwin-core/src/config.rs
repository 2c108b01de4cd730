//! Configuration for a device twin instance

use crate::validation::Limits;

/// Maximum nesting of maps below a top-level property
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Maximum key length, in characters
pub const DEFAULT_MAX_KEY_LENGTH: usize = 128;

/// Configuration for a [`DeviceTwin`](crate::DeviceTwin)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwinConfig {
    /// How many levels of nested maps a property value may contain
    pub max_depth: usize,

    /// Longest key accepted anywhere in the twin
    pub max_key_length: usize,

    /// Track `$metadata` for desired and reported properties
    pub metadata: bool,

    /// Enable the tags collection
    pub tags: bool,
}

impl TwinConfig {
    /// Validation limits derived from this configuration
    pub fn limits(&self) -> Limits {
        Limits {
            max_depth: self.max_depth,
            max_key_length: self.max_key_length,
        }
    }
}

impl Default for TwinConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            metadata: false,
            tags: false,
        }
    }
}
