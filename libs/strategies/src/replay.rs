//! Deterministic replay of a recorded schedule

use crate::{ExplorationStrategy, StrategyError};
use tracing::warn;
use types::{Decision, OperationId, ProgramState, Schedule, SchedulableOperation};

/// Feeds a recorded [`Schedule`] back, one decision per scheduling point
pub struct ReplayStrategy {
    schedule: Schedule,
    cursor: usize,
}

impl ReplayStrategy {
    pub fn new(schedule: Schedule) -> Self {
        Self { schedule, cursor: 0 }
    }

    /// Decisions consumed so far
    pub fn position(&self) -> usize {
        self.cursor
    }

    fn next(&mut self, requested: &str) -> Result<Decision, StrategyError> {
        let decision = self.schedule.get(self.cursor).ok_or_else(|| {
            warn!(recorded = self.schedule.len(), requested, "Replay ran out of decisions");
            StrategyError::ReplayExhausted {
                recorded: self.schedule.len(),
            }
        })?;
        self.cursor += 1;
        Ok(decision)
    }

    fn diverged(&self, decision: Decision, requested: impl Into<String>) -> StrategyError {
        let requested = requested.into();
        warn!(index = self.cursor - 1, %decision, %requested, "Replay diverged");
        StrategyError::diverged(self.cursor - 1, decision, requested)
    }
}

impl ExplorationStrategy for ReplayStrategy {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn choose_operation(
        &mut self,
        _state: &ProgramState,
        enabled: &[SchedulableOperation],
    ) -> Result<OperationId, StrategyError> {
        match self.next("operation")? {
            Decision::Operation(id) if enabled.iter().any(|op| op.id == id) => Ok(id),
            Decision::Operation(id) => {
                let decision = Decision::Operation(id);
                Err(self.diverged(decision, format!("an enabled operation, {} is not enabled", id)))
            }
            other => Err(self.diverged(other, "operation")),
        }
    }

    fn choose_boolean(
        &mut self,
        _state: &ProgramState,
        _max_value: u32,
    ) -> Result<bool, StrategyError> {
        match self.next("boolean")? {
            Decision::Boolean(value) => Ok(value),
            other => Err(self.diverged(other, "boolean")),
        }
    }

    fn choose_integer(
        &mut self,
        _state: &ProgramState,
        max_value: u32,
    ) -> Result<u32, StrategyError> {
        match self.next("integer")? {
            Decision::Integer(value) if value < max_value => Ok(value),
            other => Err(self.diverged(other, format!("integer below {}", max_value))),
        }
    }

    fn prepare_next_iteration(&mut self, _found_bug: bool) -> bool {
        self.cursor = 0;
        false
    }
}
