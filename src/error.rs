//! Error types for the send path and flavour construction.
//!
//! Receive-path faults are not errors: malformed packets make the codec
//! return `None`, and unwanted packets are rejected with `false` by the
//! heap assembler. Both are logged and recovered locally.

use std::fmt;

/// Classification of a send-path or construction error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A caller-supplied value is outside its valid range
    /// (item ID too wide for the flavour, invalid flavour split,
    /// packet size too small to frame a heap).
    InvalidArgument,
}

/// Error with a kind and a human-readable message.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Create an error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    /// Create an `InvalidArgument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidArgument, message)
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::InvalidArgument => write!(f, "invalid argument: {}", self.message),
        }
    }
}

impl std::error::Error for Error {}

/// Result type alias for fallible spead operations.
pub type Result<T> = std::result::Result<T, Error>;
