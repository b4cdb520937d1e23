//! Error types for the resync cache core.
//!
//! Every failure that crosses the library boundary is a [`ResyncError`]. Raw
//! transport errors are converted at the edge so collaborators only ever see a
//! settled error with a human-readable message.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Main error type for the resync library.
#[derive(Debug, Error)]
pub enum ResyncError {
    // Transport errors
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    // HTTP status errors
    #[error("{message}")]
    Client { status: u16, message: String },

    #[error("{message}")]
    Unauthorized { message: String },

    #[error("{message}")]
    Server { status: u16, message: String },

    // Response body errors
    #[error("{message}")]
    Api { message: String },

    #[error("Unexpected response format: {0}")]
    Normalization(String),

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Local errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Token storage error: {message}")]
    Storage { message: String },
}

/// Result type alias for resync operations.
pub type Result<T> = std::result::Result<T, ResyncError>;

impl From<serde_json::Error> for ResyncError {
    fn from(err: serde_json::Error) -> Self {
        ResyncError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ResyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ResyncError::Timeout(Duration::from_secs(0))
        } else {
            ResyncError::Network {
                message: err.to_string(),
            }
        }
    }
}

impl From<std::io::Error> for ResyncError {
    fn from(err: std::io::Error) -> Self {
        ResyncError::Storage {
            message: err.to_string(),
        }
    }
}

impl ResyncError {
    /// Build the status error matching an HTTP status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => ResyncError::Unauthorized { message },
            400..=499 => ResyncError::Client { status, message },
            _ => ResyncError::Server { status, message },
        }
    }

    /// HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ResyncError::Client { status, .. } | ResyncError::Server { status, .. } => {
                Some(*status)
            }
            ResyncError::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }

    /// Whether this is a 4xx error.
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(400..=499))
    }

    /// Check if this error class may succeed on a later attempt.
    ///
    /// Attempt budgets live in [`crate::network::RetryPolicy`]; this only answers
    /// whether retrying makes sense at all.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResyncError::Network { .. }
            | ResyncError::Timeout(_)
            | ResyncError::Server { .. } => true,
            ResyncError::Client { status, .. } => matches!(status, 408 | 429),
            _ => false,
        }
    }

    /// Snapshot of this error suitable for storing in a cache entry.
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            message: self.to_string(),
            status: self.status(),
            retryable: self.is_retryable(),
        }
    }
}

/// Cloneable description of a settled error, stored in cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub retryable: bool,
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_is_server_message() {
        let err = ResyncError::from_status(404, "Todo not found");
        assert_eq!(err.to_string(), "Todo not found");
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_from_status_classes() {
        assert!(matches!(
            ResyncError::from_status(401, "expired"),
            ResyncError::Unauthorized { .. }
        ));
        assert!(matches!(
            ResyncError::from_status(422, "invalid"),
            ResyncError::Client { status: 422, .. }
        ));
        assert!(matches!(
            ResyncError::from_status(503, "down"),
            ResyncError::Server { status: 503, .. }
        ));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ResyncError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(ResyncError::from_status(500, "boom").is_retryable());
        assert!(ResyncError::from_status(429, "slow down").is_retryable());
        assert!(ResyncError::from_status(408, "timeout").is_retryable());
        assert!(!ResyncError::from_status(404, "missing").is_retryable());
        assert!(!ResyncError::Normalization("x".into()).is_retryable());
    }

    #[test]
    fn test_error_info_snapshot() {
        let info = ResyncError::from_status(429, "Too many requests").to_info();
        assert_eq!(info.message, "Too many requests");
        assert_eq!(info.status, Some(429));
        assert!(info.retryable);
    }
}
