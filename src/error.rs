//! Error types for Wayfarer.
//!
//! Only programming errors (malformed keys or session ids), configuration
//! problems and provider failures are errors. A cache miss or an unknown
//! session is an expected outcome and is modelled as a value, not as an
//! error variant.

use thiserror::Error;

/// Errors surfaced by the cache, the conversation manager and their callers.
#[derive(Error, Debug)]
pub enum WayfarerError {
    /// Cache key was empty or otherwise malformed.
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// Session id was empty or otherwise malformed.
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// Configuration could not be read or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The external completion call failed.
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl WayfarerError {
    /// `true` for errors caused by the caller passing malformed input.
    pub fn is_programming_error(&self) -> bool {
        matches!(self, Self::InvalidKey(_) | Self::InvalidSessionId(_))
    }
}

impl From<reqwest::Error> for WayfarerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Provider(err.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, WayfarerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_programming_errors_classified() {
        assert!(WayfarerError::InvalidKey("empty".into()).is_programming_error());
        assert!(WayfarerError::InvalidSessionId("empty".into()).is_programming_error());
        assert!(!WayfarerError::Config("bad".into()).is_programming_error());
        assert!(!WayfarerError::Provider("down".into()).is_programming_error());
    }

    #[test]
    fn test_error_display() {
        let err = WayfarerError::InvalidKey("key must not be empty".into());
        assert_eq!(err.to_string(), "Invalid cache key: key must not be empty");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: WayfarerError = io.into();
        assert!(matches!(err, WayfarerError::Io(_)));
    }
}
