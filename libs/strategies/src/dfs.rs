//! Exhaustive depth-first exploration
//!
//! Every decision of an iteration (operation, boolean or integer) is a node
//! with `count` alternatives. The strategy keeps the path of the current
//! iteration as a stack of `(count, chosen)` pairs. The next iteration replays
//! the path up to its deepest node that still has an untried alternative,
//! takes that alternative and continues with the first alternative everywhere
//! below. When no node has alternatives left the space is exhausted.
//!
//! The search is complete up to the engine's step bound: with a bounded
//! program every distinct schedule is produced exactly once.

use crate::{check_range, ExplorationStrategy, StrategyError};
use tracing::{debug, trace};
use types::{OperationId, ProgramState, SchedulableOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Choice {
    count: usize,
    index: usize,
}

/// Depth-first backtracking over all decisions
#[derive(Debug, Default)]
pub struct DfsStrategy {
    path: Vec<Choice>,
    depth: usize,
    iterations: u64,
    exhausted: bool,
}

impl DfsStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every schedule has been produced
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Completed iterations
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    fn next_index(&mut self, count: usize) -> usize {
        let index = match self.path.get_mut(self.depth) {
            Some(choice) => {
                if choice.count != count {
                    // nondeterminism outside the engine's control; keep the prefix usable
                    debug!(
                        depth = self.depth,
                        recorded = choice.count,
                        observed = count,
                        "Decision arity changed between iterations"
                    );
                    choice.count = count;
                    choice.index = choice.index.min(count - 1);
                }
                choice.index
            }
            None => {
                self.path.push(Choice { count, index: 0 });
                0
            }
        };
        self.depth += 1;
        index
    }

    /// Advance to the next untried path; false once exhausted
    fn backtrack(&mut self) -> bool {
        self.path.truncate(self.depth);
        while let Some(last) = self.path.last_mut() {
            if last.index + 1 < last.count {
                last.index += 1;
                return true;
            }
            self.path.pop();
        }
        false
    }
}

impl ExplorationStrategy for DfsStrategy {
    fn name(&self) -> &'static str {
        "dfs"
    }

    fn choose_operation(
        &mut self,
        _state: &ProgramState,
        enabled: &[SchedulableOperation],
    ) -> Result<OperationId, StrategyError> {
        if enabled.is_empty() {
            return Err(StrategyError::NoEnabledOperations);
        }
        let index = self.next_index(enabled.len());
        trace!(depth = self.depth, index, of = enabled.len(), "DFS operation choice");
        Ok(enabled[index].id)
    }

    fn choose_boolean(
        &mut self,
        _state: &ProgramState,
        max_value: u32,
    ) -> Result<bool, StrategyError> {
        check_range(max_value)?;
        if max_value == 1 {
            return Ok(true);
        }
        Ok(self.next_index(2) == 1)
    }

    fn choose_integer(
        &mut self,
        _state: &ProgramState,
        max_value: u32,
    ) -> Result<u32, StrategyError> {
        check_range(max_value)?;
        Ok(self.next_index(max_value as usize) as u32)
    }

    fn prepare_next_iteration(&mut self, _found_bug: bool) -> bool {
        self.iterations += 1;
        let more = self.backtrack();
        self.depth = 0;
        if !more {
            self.exhausted = true;
            debug!(iterations = self.iterations, "DFS search space exhausted");
        }
        more
    }
}
