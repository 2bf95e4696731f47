//! Error types for the telemetry sender

use crate::line::DataKind;
use std::fmt;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, SenderError>;

/// How a failure is treated by the pipeline that observed it.
///
/// Pipelines branch on this value only, never on the concrete error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Line rejected at the buffer boundary (full or closed)
    Admission,

    /// Line failed to render before it reached a buffer
    Encoding,

    /// Delivery failed and the batch may succeed on a later tick
    Retryable,

    /// The remote service asked the sender to slow down
    Overload,

    /// Credentials are missing or were rejected; retrying cannot help
    Authentication,

    /// The sender was configured with invalid settings
    Config,
}

#[derive(Debug)]
pub enum SenderError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP request failed before a response arrived
    Http(reqwest::Error),

    /// JSON serialization/deserialization failed
    Json(serde_json::Error),

    /// Configuration error
    Config(String),

    /// Buffer for the given data kind is at capacity
    BufferFull { kind: DataKind },

    /// Sender has been closed
    Closed,

    /// Encoder rejected the record
    InvalidLine(String),

    /// Remote answered with a non-success status
    Status { status: u16, body: String },

    /// Remote answered with an overload status
    Throttled { status: u16 },

    /// Credential acquisition or validation failed
    Auth(String),

    /// Connection attempt did not finish in time
    Timeout(Duration),

    /// Stream connection is not available
    Disconnected(String),
}

impl SenderError {
    /// Classify this error for the dispatcher
    pub fn kind(&self) -> ErrorKind {
        match self {
            SenderError::BufferFull { .. } | SenderError::Closed => ErrorKind::Admission,
            SenderError::InvalidLine(_) | SenderError::Json(_) => ErrorKind::Encoding,
            SenderError::Throttled { .. } => ErrorKind::Overload,
            SenderError::Auth(_) => ErrorKind::Authentication,
            SenderError::Config(_) => ErrorKind::Config,
            SenderError::Io(_)
            | SenderError::Http(_)
            | SenderError::Status { .. }
            | SenderError::Timeout(_)
            | SenderError::Disconnected(_) => ErrorKind::Retryable,
        }
    }
}

impl fmt::Display for SenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderError::Io(err) => write!(f, "IO error: {}", err),
            SenderError::Http(err) => write!(f, "HTTP error: {}", err),
            SenderError::Json(err) => write!(f, "JSON error: {}", err),
            SenderError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SenderError::BufferFull { kind } => write!(f, "{} buffer full, dropping line", kind),
            SenderError::Closed => write!(f, "Sender is closed"),
            SenderError::InvalidLine(msg) => write!(f, "Invalid line: {}", msg),
            SenderError::Status { status, body } => {
                write!(f, "Unexpected response status {}: {}", status, body)
            }
            SenderError::Throttled { status } => {
                write!(f, "Throttled by remote service (status {})", status)
            }
            SenderError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            SenderError::Timeout(after) => write!(f, "Timed out after {:?}", after),
            SenderError::Disconnected(msg) => write!(f, "Disconnected: {}", msg),
        }
    }
}

impl std::error::Error for SenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SenderError::Io(err) => Some(err),
            SenderError::Http(err) => Some(err),
            SenderError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SenderError {
    fn from(err: std::io::Error) -> Self {
        SenderError::Io(err)
    }
}

impl From<reqwest::Error> for SenderError {
    fn from(err: reqwest::Error) -> Self {
        SenderError::Http(err)
    }
}

impl From<serde_json::Error> for SenderError {
    fn from(err: serde_json::Error) -> Self {
        SenderError::Json(err)
    }
}
