//! Strategy errors

use thiserror::Error;
use types::Decision;

/// Failures raised by a strategy while answering a scheduling point
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    /// The recorded decision does not fit the program at this step
    #[error(
        "replay diverged at decision {index}: recorded {recorded}, program asked for {requested}"
    )]
    ReplayDiverged {
        index: usize,
        recorded: String,
        requested: String,
    },

    /// The program asked for more decisions than were recorded
    #[error("replay exhausted after {recorded} decisions")]
    ReplayExhausted { recorded: usize },

    /// A strategy was asked to choose among zero operations
    #[error("no enabled operations to choose from")]
    NoEnabledOperations,

    /// A nondeterministic choice with an empty range
    #[error("invalid choice range: max value {max_value}")]
    InvalidRange { max_value: u32 },
}

impl StrategyError {
    pub fn diverged(index: usize, recorded: Decision, requested: impl Into<String>) -> Self {
        Self::ReplayDiverged {
            index,
            recorded: recorded.to_string(),
            requested: requested.into(),
        }
    }
}

impl From<StrategyError> for types::Error {
    fn from(err: StrategyError) -> Self {
        match err {
            StrategyError::ReplayDiverged { .. } | StrategyError::ReplayExhausted { .. } => {
                types::Error::replay(err.to_string())
            }
            StrategyError::NoEnabledOperations | StrategyError::InvalidRange { .. } => {
                types::Error::configuration(err.to_string(), None)
            }
        }
    }
}
