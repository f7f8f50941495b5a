//! Uniform random exploration

use crate::{check_range, ExplorationStrategy, StrategyError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use types::{OperationId, ProgramState, SchedulableOperation};

/// Uniform choices; iteration `n` is driven by seed `base + n`
pub struct RandomStrategy {
    base_seed: u64,
    iteration: u64,
    rng: StdRng,
}

impl RandomStrategy {
    pub fn new(base_seed: u64) -> Self {
        Self {
            base_seed,
            iteration: 0,
            rng: StdRng::seed_from_u64(base_seed),
        }
    }

    fn iteration_seed(&self) -> u64 {
        self.base_seed.wrapping_add(self.iteration)
    }
}

impl ExplorationStrategy for RandomStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn choose_operation(
        &mut self,
        _state: &ProgramState,
        enabled: &[SchedulableOperation],
    ) -> Result<OperationId, StrategyError> {
        if enabled.is_empty() {
            return Err(StrategyError::NoEnabledOperations);
        }
        let index = self.rng.gen_range(0..enabled.len());
        Ok(enabled[index].id)
    }

    fn choose_boolean(
        &mut self,
        _state: &ProgramState,
        max_value: u32,
    ) -> Result<bool, StrategyError> {
        check_range(max_value)?;
        Ok(self.rng.gen_range(0..max_value) == 0)
    }

    fn choose_integer(
        &mut self,
        _state: &ProgramState,
        max_value: u32,
    ) -> Result<u32, StrategyError> {
        check_range(max_value)?;
        Ok(self.rng.gen_range(0..max_value))
    }

    fn prepare_next_iteration(&mut self, _found_bug: bool) -> bool {
        self.iteration += 1;
        self.rng = StdRng::seed_from_u64(self.iteration_seed());
        true
    }

    fn current_seed(&self) -> Option<u64> {
        Some(self.iteration_seed())
    }
}
