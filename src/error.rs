use hyper::StatusCode;
use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

/// Main error type for the tile proxy
///
/// The type is `Clone` so that one acquisition outcome can be handed to every
/// caller waiting on the same coalesced session refresh.
#[derive(Error, Debug, Clone)]
pub enum TilegateError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Session acquisition failed (network, unexpected status, missing markers,
    /// failed verification fetch)
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Network errors outside of a keyed upstream connection
    #[error("Network error: {message}")]
    Network { message: String },

    /// Connection-level failure talking to an upstream key
    #[error("Upstream transport error on '{key}': {message}")]
    UpstreamTransport { key: String, message: String },

    /// Upstream answered with a 401/403 class status
    #[error("Upstream rejected credentials with status {status}")]
    UpstreamRejected { status: u16 },

    /// Upstream answered 404
    #[error("Upstream resource not found")]
    UpstreamNotFound,

    /// Upstream answered with something other than an image, a 404 or a rejection
    #[error("Unexpected upstream response: status {status}, content-type {content_type:?}")]
    UnexpectedResponse {
        status: u16,
        content_type: Option<String>,
    },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout {
        duration: Duration,
        operation: String,
    },

    /// Cookie persistence errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TilegateError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an upstream transport error for a given key
    pub fn upstream_transport<K: Into<String>, S: Into<String>>(key: K, message: S) -> Self {
        Self::UpstreamTransport {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn upstream_rejected(status: StatusCode) -> Self {
        Self::UpstreamRejected {
            status: status.as_u16(),
        }
    }

    pub fn unexpected_response(status: StatusCode, content_type: Option<String>) -> Self {
        Self::UnexpectedResponse {
            status: status.as_u16(),
            content_type,
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(duration: Duration, operation: S) -> Self {
        Self::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is evidence that the current session may no longer be
    /// accepted: any upstream status other than 200 or 404. Transport failures
    /// never are.
    pub fn invalidates_session(&self) -> bool {
        match self {
            TilegateError::UpstreamRejected { .. } => true,
            TilegateError::UnexpectedResponse { status, .. } => *status != StatusCode::OK.as_u16(),
            _ => false,
        }
    }

    /// Status code presented to the client for this error
    pub fn client_status(&self) -> StatusCode {
        match self {
            TilegateError::UpstreamNotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Upstream status carried by this error, if the upstream answered at all
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            TilegateError::UpstreamRejected { status } => Some(*status),
            TilegateError::UnexpectedResponse { status, .. } => Some(*status),
            TilegateError::UpstreamNotFound => Some(StatusCode::NOT_FOUND.as_u16()),
            _ => None,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TilegateError::Config { .. } => ErrorSeverity::Critical,
            TilegateError::Auth { .. } => ErrorSeverity::High,
            TilegateError::Storage { .. } => ErrorSeverity::Medium,
            TilegateError::Network { .. } => ErrorSeverity::Medium,
            TilegateError::UpstreamTransport { .. } => ErrorSeverity::Medium,
            TilegateError::UpstreamRejected { .. } => ErrorSeverity::Medium,
            TilegateError::UnexpectedResponse { .. } => ErrorSeverity::Medium,
            TilegateError::Timeout { .. } => ErrorSeverity::Medium,
            TilegateError::UpstreamNotFound => ErrorSeverity::Low,
            TilegateError::Internal { .. } => ErrorSeverity::High,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "LOW"),
            ErrorSeverity::Medium => write!(f, "MEDIUM"),
            ErrorSeverity::High => write!(f, "HIGH"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Result type alias for tile proxy operations
pub type TilegateResult<T> = Result<T, TilegateError>;

/// Convert from anyhow::Error to TilegateError
impl From<anyhow::Error> for TilegateError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return TilegateError::storage(format!("IO error: {}", io_err));
        }

        if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
            return TilegateError::network(format!("HTTP error: {}", hyper_err));
        }

        TilegateError::internal(err.to_string())
    }
}

impl From<std::io::Error> for TilegateError {
    fn from(err: std::io::Error) -> Self {
        TilegateError::storage(format!("IO error: {}", err))
    }
}

impl From<hyper::Error> for TilegateError {
    fn from(err: hyper::Error) -> Self {
        if err.is_connect() {
            TilegateError::network(format!("Connection error: {}", err))
        } else {
            TilegateError::network(format!("HTTP error: {}", err))
        }
    }
}

impl From<serde_json::Error> for TilegateError {
    fn from(err: serde_json::Error) -> Self {
        TilegateError::storage(format!("JSON serialization error: {}", err))
    }
}

impl From<toml::de::Error> for TilegateError {
    fn from(err: toml::de::Error) -> Self {
        TilegateError::config(format!("TOML parsing error: {}", err))
    }
}

impl From<hyper::http::uri::InvalidUri> for TilegateError {
    fn from(err: hyper::http::uri::InvalidUri) -> Self {
        TilegateError::config(format!("Invalid URI: {}", err))
    }
}

impl From<hyper::http::Error> for TilegateError {
    fn from(err: hyper::http::Error) -> Self {
        TilegateError::internal(format!("HTTP builder error: {}", err))
    }
}

impl From<hyper::header::InvalidHeaderValue> for TilegateError {
    fn from(err: hyper::header::InvalidHeaderValue) -> Self {
        TilegateError::internal(format!("Invalid header value: {}", err))
    }
}
