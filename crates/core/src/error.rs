//! Shared error type for MovieRec services

use thiserror::Error;

/// Errors raised by the shared infrastructure (configuration, database pool).
///
/// Engine-level failures (model, artifact, training) have their own types in
/// `movierec-sequential`; this type only covers what every binary needs to
/// bootstrap.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {message}")]
    ConfigurationError {
        message: String,
        /// Environment variable the problem was found in, when known
        key: Option<String>,
    },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl CoreError {
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        CoreError::ConfigurationError {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Environment variable associated with a configuration error
    pub fn key(&self) -> Option<&str> {
        match self {
            CoreError::ConfigurationError { key, .. } => key.as_deref(),
            CoreError::DatabaseError(_) => None,
        }
    }
}
