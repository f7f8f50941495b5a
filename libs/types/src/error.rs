//! Error taxonomy for systematic testing
//!
//! Bugs found in the program under test (assertion, deadlock, liveness and
//! panics) and mistakes in the test itself (configuration, replay divergence)
//! share one error type so user handlers can propagate either with `?`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a bug found during exploration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    Assertion,
    Deadlock,
    Liveness,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViolationKind::Assertion => "assertion",
            ViolationKind::Deadlock => "deadlock",
            ViolationKind::Liveness => "liveness",
        };
        f.write_str(name)
    }
}

/// Engine and program-under-test errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Explicit assertion or invariant check failed
    #[error("Assertion failure: {message}")]
    Assertion { message: String },

    /// No enabled operation while tasks are still blocked
    #[error("Deadlock detected: {message}")]
    Deadlock { message: String },

    /// A monitor stayed in a hot state
    #[error("Liveness violation in monitor '{monitor}': {message}")]
    Liveness { monitor: String, message: String },

    /// The program under test is malformed
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// A recorded schedule does not match the program
    #[error("Replay error: {message}")]
    Replay { message: String },

    /// User code panicked
    #[error("Panic in program under test: {message}")]
    Panicked { message: String },
}

/// Result type alias used by the engine and by user handlers
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an assertion error
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
        }
    }

    /// Create a deadlock error
    pub fn deadlock(message: impl Into<String>) -> Self {
        Self::Deadlock {
            message: message.into(),
        }
    }

    /// Create a liveness error for the named monitor
    pub fn liveness(monitor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Liveness {
            monitor: monitor.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a replay error
    pub fn replay(message: impl Into<String>) -> Self {
        Self::Replay {
            message: message.into(),
        }
    }

    /// Create a panic error
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::Panicked {
            message: message.into(),
        }
    }

    /// Bug classification, `None` for errors in the test itself
    pub fn violation_kind(&self) -> Option<ViolationKind> {
        match self {
            Error::Assertion { .. } | Error::Panicked { .. } => Some(ViolationKind::Assertion),
            Error::Deadlock { .. } => Some(ViolationKind::Deadlock),
            Error::Liveness { .. } => Some(ViolationKind::Liveness),
            Error::Configuration { .. } | Error::Replay { .. } => None,
        }
    }

    /// Fatal errors abort the whole run instead of just the iteration
    pub fn is_fatal(&self) -> bool {
        self.violation_kind().is_none()
    }

    /// Error category for logs and reports
    pub fn category(&self) -> &'static str {
        match self {
            Error::Assertion { .. } => "assertion",
            Error::Deadlock { .. } => "deadlock",
            Error::Liveness { .. } => "liveness",
            Error::Configuration { .. } => "configuration",
            Error::Replay { .. } => "replay",
            Error::Panicked { .. } => "panicked",
        }
    }

    /// Message without the category prefix
    pub fn message(&self) -> &str {
        match self {
            Error::Assertion { message }
            | Error::Deadlock { message }
            | Error::Liveness { message, .. }
            | Error::Configuration { message, .. }
            | Error::Replay { message }
            | Error::Panicked { message } => message,
        }
    }
}
