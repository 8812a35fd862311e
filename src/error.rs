use std::path::PathBuf;
use thiserror::Error;

use crate::retrieval::PassageId;

/// Main error type for Lectern
#[derive(Error, Debug)]
pub enum LecternError {
    /// Query string rejected before any oracle call
    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// Caller supplied parameters that can never produce a valid search
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// Token budget for context assembly must be positive
    #[error("Invalid token budget: {budget}")]
    InvalidBudget { budget: usize },

    /// An external oracle (embedder, similarity, lexical, passage store) failed or timed out
    #[error("{oracle} unavailable: {reason}")]
    OracleUnavailable { oracle: String, reason: String },

    /// A passage id could not be hydrated
    #[error("Passage not found: {id}")]
    PassageNotFound { id: PassageId },

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Embedding model errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    /// Vector index errors
    #[error("Vector index error: {0}")]
    VectorIndex(#[from] crate::embedding::VectorIndexError),

    /// Keyword index errors
    #[error("Keyword index error: {0}")]
    KeywordIndex(#[from] crate::embedding::KeywordIndexError),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LecternError {
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    pub fn unavailable(oracle: impl Into<String>, reason: impl ToString) -> Self {
        Self::OracleUnavailable {
            oracle: oracle.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures callers should report as "search temporarily unavailable"
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::OracleUnavailable { .. })
    }

    /// True for failures caused by the caller's own input
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuery { .. } | Self::InvalidConfiguration { .. } | Self::InvalidBudget { .. }
        )
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Lectern operations
pub type Result<T> = std::result::Result<T, LecternError>;
