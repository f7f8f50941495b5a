//! Default values for exploration sessions

/// Iterations per session
pub const ITERATIONS: u64 = 100;

/// Scheduling steps per iteration before the bound is hit
pub const MAX_STEPS: u64 = 10_000;

/// Base seed when none is supplied
pub const SEED: u64 = 0;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "INTERLEAVE";

/// Q-learning defaults
pub mod qlearning {
    pub const LEARNING_RATE: f64 = 0.3;
    pub const DISCOUNT: f64 = 0.7;
    pub const EPSILON: f64 = 0.1;
    pub const BUG_REWARD: f64 = 100.0;

    /// Negative per-step reward makes already seen transitions less attractive
    pub const STEP_REWARD: f64 = -1.0;
}
