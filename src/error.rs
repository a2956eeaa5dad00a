//! Error types and handling for the svckit runtime.
//!
//! This module provides structured errors with automatic HTTP status code
//! mapping. All request-path errors serialize to the wire envelope
//! `{"error": <status-phrase>, "message": <detail>}` (see
//! [`crate::server::error_response`]).
//!
//! # Design
//!
//! This module uses an opaque `Error` struct paired with an `ErrorKind` enum,
//! following the `std::io::Error` pattern. This design provides API stability:
//! internal error sources can change without breaking consumers.
//!
//! # Example
//!
//! ```rust
//! use svckit::{Error, ErrorKind};
//!
//! let error = Error::already_running("http-server");
//!
//! match error.kind() {
//!     ErrorKind::AlreadyRunning => println!("soft error: {}", error),
//!     _ => println!("other error: {}", error),
//! }
//!
//! use http::StatusCode;
//! assert_eq!(error.status_code(), StatusCode::CONFLICT);
//! ```

use http::StatusCode;
use std::fmt;
use thiserror::Error;

/// The kind of error that occurred.
///
/// This enum categorizes errors for matching purposes. Use `Error::kind()`
/// to get the kind of an error.
///
/// # Stability
///
/// This enum is marked `#[non_exhaustive]`, so new variants may be added
/// in future versions without breaking existing code. Always include a
/// wildcard arm when matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Configuration error (invalid TOML, missing values, bad section).
    #[error("configuration error")]
    Configuration,

    /// Component is already running (double start).
    #[error("already running")]
    AlreadyRunning,

    /// Component is not running (stop without start).
    #[error("not running")]
    NotRunning,

    /// Routing miss or missing resource.
    #[error("not found")]
    NotFound,

    /// Authentication or authorization error.
    #[error("authentication error")]
    Authentication,

    /// Invalid input (bad pattern, header, request data).
    #[error("invalid input")]
    InvalidInput,

    /// Cache operation error (empty key, eviction failure).
    #[error("cache error")]
    Cache,

    /// Capacity exhausted and eviction impossible.
    #[error("capacity exceeded")]
    Capacity,

    /// TLS/certificate error.
    #[error("TLS error")]
    Tls,

    /// I/O error (file operations, network).
    #[error("I/O error")]
    Io,

    /// Document store error.
    #[error("store error")]
    Store,

    /// Requested backend name is not registered.
    #[error("unknown backend")]
    UnknownBackend,

    /// Operation exceeded its deadline.
    #[error("timeout")]
    Timeout,

    /// Operation was cancelled by shutdown.
    #[error("cancelled")]
    Cancelled,

    /// Internal/unexpected error.
    #[error("internal error")]
    Internal,
}

/// An error that can occur in the svckit runtime.
///
/// This is an opaque error type that wraps an underlying error source.
/// Use [`Error::kind()`] to determine the category of error for matching,
/// and the `Display` implementation to get a human-readable message.
///
/// # Creating Errors
///
/// Use the convenience constructors for common cases:
///
/// ```rust
/// use svckit::Error;
///
/// let err = Error::internal("unexpected state");
/// let err = Error::invalid_input("missing required field");
/// let err = Error::not_found("no route for GET /missing");
/// ```
///
/// Or use [`Error::new()`] for full control:
///
/// ```rust
/// use svckit::{Error, ErrorKind};
///
/// let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
/// let err = Error::new(ErrorKind::Io, io_err);
/// ```
pub struct Error {
    kind: ErrorKind,
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl Error {
    /// Creates a new error with the given kind and source.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self {
            kind,
            source: error.into(),
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the HTTP status code for this error.
    ///
    /// Lifecycle and backend errors map to 5xx except the soft lifecycle
    /// conflicts, which map to 409 so callers can distinguish them.
    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::AlreadyRunning => StatusCode::CONFLICT,
            ErrorKind::NotRunning => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Cache => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Capacity => StatusCode::INSUFFICIENT_STORAGE,
            ErrorKind::Tls => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Store => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::UnknownBackend => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` for the soft lifecycle conflicts that callers are
    /// expected to tolerate (double start, stop when stopped).
    pub fn is_lifecycle_conflict(&self) -> bool {
        matches!(self.kind, ErrorKind::AlreadyRunning | ErrorKind::NotRunning)
    }

    /// Consumes the error and returns the inner error source.
    pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self.source
    }
}

// ============================================================================
// Convenience constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, msg.into())
    }

    /// Creates an already-running error for the named component.
    pub fn already_running(component: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::AlreadyRunning,
            format!("{} is already running", component.into()),
        )
    }

    /// Creates a not-running error for the named component.
    pub fn not_running(component: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::NotRunning,
            format!("{} is not running", component.into()),
        )
    }

    /// Creates a not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg.into())
    }

    /// Creates an authentication error.
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, msg.into())
    }

    /// Creates an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, msg.into())
    }

    /// Creates a cache error.
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cache, msg.into())
    }

    /// Creates a capacity error.
    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capacity, msg.into())
    }

    /// Creates a TLS error.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Tls, msg.into())
    }

    /// Creates an I/O error from a message.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, msg.into())
    }

    /// Creates a document store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store, msg.into())
    }

    /// Creates an unknown-backend error.
    pub fn unknown_backend(name: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UnknownBackend,
            format!("no backend registered under {:?}", name.into()),
        )
    }

    /// Creates a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg.into())
    }

    /// Creates a cancelled error.
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, msg.into())
    }

    /// Creates an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg.into())
    }
}

// ============================================================================
// Trait implementations
// ============================================================================

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

// ============================================================================
// From implementations
// ============================================================================

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::new(ErrorKind::Configuration, err)
    }
}

impl From<std::env::VarError> for Error {
    fn from(err: std::env::VarError) -> Self {
        Self::new(ErrorKind::Configuration, err)
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::new(ErrorKind::InvalidInput, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::InvalidInput, err)
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Self::new(ErrorKind::Tls, err)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::new(ErrorKind::Timeout, err)
    }
}

// ============================================================================
// Tests
// ============================================================================
