//! Centralized error types for Cartography.

use thiserror::Error;

/// Main error type for Cartography core operations.
#[derive(Error, Debug)]
pub enum CartographyError {
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid graph identifier '{0}': only letters, digits and '_' are allowed")]
    InvalidIdentifier(String),

    #[error("Invalid permission relationship mapping: {0}")]
    InvalidRelationshipMapping(String),

    #[error("Invalid policy statement: {0}")]
    InvalidStatement(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for Cartography core operations.
pub type CartographyResult<T> = Result<T, CartographyError>;

impl CartographyError {
    /// Create a schema error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
