//! Typed failure kinds carried by exchanges.
//!
//! Failures are tagged with an [`ErrorKind`] instead of a type name so that
//! failover policies can match on them without reflection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse classification of a delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The destination could not be reached.
    Connect,
    /// The destination did not answer in time.
    Timeout,
    /// Transport-level I/O failure after connecting.
    Io,
    /// The destination refused the message.
    Rejected,
    /// The message was malformed for the destination.
    Validation,
    /// An operation was invalid for the current state (e.g. a finished saga).
    IllegalState,
    /// A routing/delivery failure raised by the mediation layer itself.
    Delivery,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Stable lowercase name, used in logs and metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connect => "connect",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Io => "io",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Validation => "validation",
            ErrorKind::IllegalState => "illegal_state",
            ErrorKind::Delivery => "delivery",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure recorded on an exchange or returned by a processor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ExchangeError {
    /// Classification used for failover matching.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl ExchangeError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an [`ErrorKind::Connect`] failure.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connect, message)
    }

    /// Shorthand for an [`ErrorKind::Io`] failure.
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    /// Shorthand for an [`ErrorKind::Rejected`] failure.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, message)
    }

    /// Shorthand for an [`ErrorKind::Delivery`] failure.
    pub fn delivery(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Delivery, message)
    }

    /// Shorthand for an [`ErrorKind::IllegalState`] failure.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalState, message)
    }
}
