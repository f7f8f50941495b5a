//! # Exploration Strategies
//!
//! A strategy answers every scheduling point of an iteration: which enabled
//! operation runs next, and which value a nondeterministic boolean or integer
//! takes. Between iterations the engine calls
//! [`ExplorationStrategy::prepare_next_iteration`] so the strategy can move on
//! to a new schedule (or report that the search space is exhausted).
//!
//! | Strategy | Search |
//! |----------|--------|
//! | [`RandomStrategy`] | uniform choices from a per-iteration seed |
//! | [`DfsStrategy`] | exhaustive depth-first backtracking over every decision |
//! | [`QLearningStrategy`] | ε-greedy over learned values of (program state, choice) |
//! | [`ReplayStrategy`] | feeds back a recorded [`types::Schedule`] |
//!
//! Enabled operations are always handed over in ascending operation-id order,
//! which is also the tie-break order whenever a strategy has no preference.

pub mod dfs;
pub mod error;
pub mod qlearning;
pub mod random;
pub mod replay;

pub use dfs::DfsStrategy;
pub use error::StrategyError;
pub use qlearning::QLearningStrategy;
pub use random::RandomStrategy;
pub use replay::ReplayStrategy;

use config::{Configuration, StrategyKind};
use types::{OperationId, ProgramState, SchedulableOperation};

/// Decision function consulted at every scheduling point
pub trait ExplorationStrategy {
    /// Short name used in reports
    fn name(&self) -> &'static str;

    /// Pick the operation to run next among `enabled` (ascending id order)
    fn choose_operation(
        &mut self,
        state: &ProgramState,
        enabled: &[SchedulableOperation],
    ) -> Result<OperationId, StrategyError>;

    /// Nondeterministic boolean that is `true` with probability `1 / max_value`
    fn choose_boolean(&mut self, state: &ProgramState, max_value: u32)
        -> Result<bool, StrategyError>;

    /// Nondeterministic integer in `0..max_value`
    fn choose_integer(&mut self, state: &ProgramState, max_value: u32)
        -> Result<u32, StrategyError>;

    /// Finish the current iteration; `false` means no further iteration is possible
    fn prepare_next_iteration(&mut self, found_bug: bool) -> bool;

    /// Seed driving the current iteration, if the strategy is seeded
    fn current_seed(&self) -> Option<u64> {
        None
    }
}

/// Build the strategy selected by `config`, seeded with `seed`
pub fn from_configuration(config: &Configuration, seed: u64) -> Box<dyn ExplorationStrategy> {
    match config.strategy {
        StrategyKind::Random => Box::new(RandomStrategy::new(seed)),
        StrategyKind::Dfs => Box::new(DfsStrategy::new()),
        StrategyKind::QLearning => Box::new(QLearningStrategy::new(config.qlearning, seed)),
    }
}

pub(crate) fn check_range(max_value: u32) -> Result<(), StrategyError> {
    if max_value == 0 {
        Err(StrategyError::InvalidRange { max_value })
    } else {
        Ok(())
    }
}
