//! Error types for the Keel client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the control plane or a deployment agent
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed (connect, timeout, body transfer)
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// HTTP call succeeded but the response envelope carried a non-200 code
    #[error("Request rejected (code {code}): {message}")]
    Rejected {
        /// Envelope code
        code: i64,
        /// Envelope message
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }

    /// Check if retrying the same request may succeed
    ///
    /// Transport failures, timeouts, 5xx, 408 and 429 are transient; so is a
    /// rejection whose envelope code is in the 5xx range. Everything else
    /// (malformed requests, unparsable bodies, 4xx) will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(e) => !e.is_builder() && !e.is_decode(),
            Self::ApiError { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Rejected { code, .. } => *code >= 500,
            Self::ParseError(_) | Self::InvalidRequest(_) => false,
        }
    }
}
