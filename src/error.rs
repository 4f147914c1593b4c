// Error types for the API request layer.
// Covers transport failures, HTTP status mapping, response transforms, and configuration.

use thiserror::Error;

/// Errors produced while issuing or processing an API request.
///
/// Cloneable so that one failure can be handed to every caller waiting on
/// the same coalesced request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication failed: invalid or expired token")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("JSON parsing error: {0}")]
    Json(String),

    #[error("Response transform failed: {0}")]
    Transform(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Request task aborted: {0}")]
    Aborted(String),
}

impl ApiError {
    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::NotFound(_) => Some(404),
            ApiError::RateLimited { .. } => Some(429),
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::RateLimited { .. } => true,
            ApiError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Json(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Json(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
