//! Error types for Task Badger operations.
//!
//! Every fallible call in the task API returns [`Result`]. Errors are raised
//! synchronously to the caller; only the safe wrappers
//! ([`create_task_safe`](crate::create_task_safe),
//! [`update_task_safe`](crate::update_task_safe)) and the Celery signal
//! handlers swallow them.

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the Task Badger client.
///
/// # Examples
///
/// ```
/// use taskbadger::Error;
///
/// let err = Error::from_status(404, b"not found".to_vec());
/// assert!(matches!(err, Error::UnexpectedStatus { status: 404, .. }));
/// assert_eq!(err.status(), Some(404));
///
/// let err = Error::from_status(503, Vec::new());
/// assert!(matches!(err, Error::ServerError { status: 503, .. }));
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The API rejected the credentials (HTTP 401).
    #[error("Authentication failed")]
    Unauthorized,

    /// The API failed with a 5xx status.
    #[error("Server error: {status}")]
    ServerError {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: Vec<u8>,
    },

    /// The API returned a status the client does not handle.
    #[error("Unexpected status code: {status}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: Vec<u8>,
    },

    /// The configured `before_create` callback vetoed the request.
    #[error("before_create callback rejected the task")]
    BeforeCreateRejected,

    /// Required configuration values were absent at bind time.
    #[error("Missing configuration parameters: {}", .missing.join(", "))]
    ConfigurationMissing {
        /// Names of the absent parameters
        missing: Vec<&'static str>,
    },

    /// A call needed settings but the current context has none bound.
    #[error("Task Badger is not configured for this context")]
    NotConfigured,

    /// The request never produced an HTTP response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A 2xx response body could not be parsed.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Request payload could not be encoded.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Maps a non-2xx HTTP status to the matching error variant.
    pub fn from_status(status: u16, body: Vec<u8>) -> Self {
        match status {
            401 => Self::Unauthorized,
            500..=599 => Self::ServerError { status, body },
            _ => Self::UnexpectedStatus { status, body },
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::ServerError { status, .. } | Self::UnexpectedStatus { status, .. } => {
                Some(*status)
            },
            _ => None,
        }
    }
}
