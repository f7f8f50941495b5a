//! Reward-guided exploration
//!
//! Keeps a value estimate `Q(s, a)` for every abstracted program state `s`
//! (the hash handed over by the runtime) and choice `a` (an operation id, a
//! boolean or an integer). Choices are ε-greedy: with probability `epsilon` a
//! uniformly random alternative, otherwise the alternative with the highest
//! value, ties resolved in ascending order.
//!
//! After each iteration the `(s, a)` trace is replayed backwards:
//!
//! ```text
//! Q(s, a) += α · (r + γ · max Q(s', ·) − Q(s, a))
//! ```
//!
//! with `r = step_reward` for every transition and `bug_reward` added on the
//! last transition of an iteration that found a bug. A negative step reward
//! devalues transitions each time they are taken, steering later iterations
//! towards unvisited choices; the bug reward pulls them back towards
//! schedules that already reached a violation.

use crate::{check_range, ExplorationStrategy, StrategyError};
use config::QLearningParams;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};
use types::{OperationId, ProgramState, SchedulableOperation, StateHasherBuilder};

/// A choice at a scheduling point
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Action {
    Operation(OperationId),
    Boolean(bool),
    Integer(u32),
}

type ActionValues = BTreeMap<Action, f64>;

/// Integer choices wider than this are drawn uniformly instead of learned
pub const LEARNED_INTEGER_RANGE: u32 = 256;

/// ε-greedy Q-learning over abstracted program states
pub struct QLearningStrategy {
    params: QLearningParams,
    seed: u64,
    rng: StdRng,
    q_table: HashMap<u64, ActionValues, StateHasherBuilder>,
    trace: Vec<(u64, Action)>,
    iterations: u64,
}

impl QLearningStrategy {
    pub fn new(params: QLearningParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            rng: StdRng::seed_from_u64(seed),
            q_table: HashMap::with_hasher(StateHasherBuilder),
            trace: Vec::new(),
            iterations: 0,
        }
    }

    /// Number of distinct abstracted states seen so far
    pub fn distinct_states(&self) -> usize {
        self.q_table.len()
    }

    /// Current value of an operation choice in a state
    pub fn operation_value(&self, state: u64, op: OperationId) -> Option<f64> {
        self.q_table
            .get(&state)
            .and_then(|values| values.get(&Action::Operation(op)))
            .copied()
    }

    fn choose(&mut self, state: u64, candidates: &[Action]) -> Action {
        let values = self.q_table.entry(state).or_default();
        for action in candidates {
            values.entry(*action).or_insert(0.0);
        }

        let chosen = if self.rng.gen::<f64>() < self.params.epsilon {
            candidates[self.rng.gen_range(0..candidates.len())]
        } else {
            let mut ordered = candidates.to_vec();
            ordered.sort();
            let mut best = ordered[0];
            let mut best_value = f64::NEG_INFINITY;
            for action in &ordered {
                let value = values.get(action).copied().unwrap_or(0.0);
                if value > best_value {
                    best = *action;
                    best_value = value;
                }
            }
            best
        };

        trace!(state, action = ?chosen, "Q-learning choice");
        self.trace.push((state, chosen));
        chosen
    }

    fn max_value(&self, state: u64) -> f64 {
        self.q_table
            .get(&state)
            .and_then(|values| values.values().copied().reduce(f64::max))
            .unwrap_or(0.0)
    }

    fn learn(&mut self, found_bug: bool) {
        let trace = std::mem::take(&mut self.trace);
        let last = trace.len().saturating_sub(1);
        for (i, (state, action)) in trace.iter().enumerate().rev() {
            let mut reward = self.params.step_reward;
            let future = if i == last {
                if found_bug {
                    reward += self.params.bug_reward;
                }
                0.0
            } else {
                self.max_value(trace[i + 1].0)
            };
            let entry = self
                .q_table
                .entry(*state)
                .or_default()
                .entry(*action)
                .or_insert(0.0);
            *entry += self.params.learning_rate * (reward + self.params.discount * future - *entry);
        }
    }
}

impl ExplorationStrategy for QLearningStrategy {
    fn name(&self) -> &'static str {
        "qlearning"
    }

    fn choose_operation(
        &mut self,
        state: &ProgramState,
        enabled: &[SchedulableOperation],
    ) -> Result<OperationId, StrategyError> {
        if enabled.is_empty() {
            return Err(StrategyError::NoEnabledOperations);
        }
        let candidates: Vec<Action> = enabled.iter().map(|op| Action::Operation(op.id)).collect();
        match self.choose(state.hash, &candidates) {
            Action::Operation(id) => Ok(id),
            _ => Err(StrategyError::NoEnabledOperations),
        }
    }

    fn choose_boolean(
        &mut self,
        state: &ProgramState,
        max_value: u32,
    ) -> Result<bool, StrategyError> {
        check_range(max_value)?;
        if max_value > 2 {
            // biased coins are not learned
            return Ok(self.rng.gen_range(0..max_value) == 0);
        }
        if max_value == 1 {
            return Ok(true);
        }
        let candidates = [Action::Boolean(false), Action::Boolean(true)];
        Ok(matches!(self.choose(state.hash, &candidates), Action::Boolean(true)))
    }

    fn choose_integer(
        &mut self,
        state: &ProgramState,
        max_value: u32,
    ) -> Result<u32, StrategyError> {
        check_range(max_value)?;
        if max_value > LEARNED_INTEGER_RANGE {
            return Ok(self.rng.gen_range(0..max_value));
        }
        let candidates: Vec<Action> = (0..max_value).map(Action::Integer).collect();
        match self.choose(state.hash, &candidates) {
            Action::Integer(value) => Ok(value),
            _ => Err(StrategyError::InvalidRange { max_value }),
        }
    }

    fn prepare_next_iteration(&mut self, found_bug: bool) -> bool {
        self.learn(found_bug);
        self.iterations += 1;
        if found_bug {
            debug!(
                iteration = self.iterations,
                states = self.q_table.len(),
                "Rewarded buggy schedule"
            );
        }
        true
    }

    fn current_seed(&self) -> Option<u64> {
        Some(self.seed)
    }
}
