//! Session Configuration Module
//!
//! Loads exploration settings from TOML with `INTERLEAVE_`-prefixed
//! environment overrides on top.

use crate::defaults;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Exploration strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Uniform random choices, seeded per iteration
    #[default]
    Random,
    /// Exhaustive depth-first search over decisions
    Dfs,
    /// Reward-guided search
    QLearning,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Random => "random",
            StrategyKind::Dfs => "dfs",
            StrategyKind::QLearning => "qlearning",
        };
        f.write_str(name)
    }
}

impl FromStr for StrategyKind {
    type Err = types::Error;

    fn from_str(s: &str) -> types::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(StrategyKind::Random),
            "dfs" => Ok(StrategyKind::Dfs),
            "qlearning" | "q-learning" | "q_learning" => Ok(StrategyKind::QLearning),
            other => Err(types::Error::configuration(
                format!("unknown strategy '{}'", other),
                Some("strategy"),
            )),
        }
    }
}

/// Parameters of the reward-guided strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QLearningParams {
    pub learning_rate: f64,
    pub discount: f64,
    pub epsilon: f64,
    pub bug_reward: f64,
    pub step_reward: f64,
}

impl Default for QLearningParams {
    fn default() -> Self {
        Self {
            learning_rate: defaults::qlearning::LEARNING_RATE,
            discount: defaults::qlearning::DISCOUNT,
            epsilon: defaults::qlearning::EPSILON,
            bug_reward: defaults::qlearning::BUG_REWARD,
            step_reward: defaults::qlearning::STEP_REWARD,
        }
    }
}

/// Settings of one exploration session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Maximum number of iterations
    pub iterations: u64,

    pub strategy: StrategyKind,

    /// Scheduling steps per iteration, `None` for unbounded
    pub max_steps: Option<u64>,

    /// Base seed; iteration `n` of worker `w` derives its own seed from it
    pub seed: Option<u64>,

    /// Consecutive steps a monitor may stay hot before it is a liveness bug
    pub liveness_threshold: Option<u64>,

    pub stop_at_first_bug: bool,

    /// Worker threads used by parallel exploration
    pub workers: usize,

    pub qlearning: QLearningParams,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            iterations: defaults::ITERATIONS,
            strategy: StrategyKind::default(),
            max_steps: Some(defaults::MAX_STEPS),
            seed: Some(defaults::SEED),
            liveness_threshold: None,
            stop_at_first_bug: true,
            workers: 1,
            qlearning: QLearningParams::default(),
        }
    }
}

impl Configuration {
    /// Parse a TOML document; absent keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Configuration =
            toml::from_str(content).context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {:?}", path))?;
        let mut config: Configuration =
            toml::from_str(&content).context("Failed to deserialize configuration")?;
        config.apply_env_overrides()?;
        config.validate()?;
        info!(
            path = ?path,
            strategy = %config.strategy,
            iterations = config.iterations,
            "Loaded exploration configuration"
        );
        Ok(config)
    }

    /// Override fields from `INTERLEAVE_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Override fields from an arbitrary key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}_{}", defaults::ENV_PREFIX, name));

        if let Some(value) = var("ITERATIONS") {
            self.iterations = value
                .parse()
                .with_context(|| format!("Invalid iteration count '{}'", value))?;
            debug!(iterations = self.iterations, "Iterations overridden from environment");
        }
        if let Some(value) = var("STRATEGY") {
            self.strategy = value.parse()?;
            debug!(strategy = %self.strategy, "Strategy overridden from environment");
        }
        if let Some(value) = var("SEED") {
            self.seed = Some(
                value
                    .parse()
                    .with_context(|| format!("Invalid seed '{}'", value))?,
            );
        }
        if let Some(value) = var("MAX_STEPS") {
            self.max_steps = match value.as_str() {
                "none" | "unbounded" => None,
                v => Some(v.parse().with_context(|| format!("Invalid step bound '{}'", v))?),
            };
        }
        if let Some(value) = var("WORKERS") {
            self.workers = value
                .parse()
                .with_context(|| format!("Invalid worker count '{}'", value))?;
        }
        Ok(())
    }

    /// Reject settings that cannot drive a session
    pub fn validate(&self) -> types::Result<()> {
        if self.iterations == 0 {
            return Err(types::Error::configuration(
                "iterations must be at least 1",
                Some("iterations"),
            ));
        }
        if self.workers == 0 {
            return Err(types::Error::configuration(
                "workers must be at least 1",
                Some("workers"),
            ));
        }
        if self.max_steps == Some(0) {
            return Err(types::Error::configuration(
                "max_steps must be positive when set",
                Some("max_steps"),
            ));
        }
        let q = &self.qlearning;
        for (name, value) in [
            ("qlearning.learning_rate", q.learning_rate),
            ("qlearning.discount", q.discount),
            ("qlearning.epsilon", q.epsilon),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(types::Error::configuration(
                    format!("{} must be within [0, 1], got {}", name, value),
                    Some(name),
                ));
            }
        }
        Ok(())
    }

    /// Base seed, falling back to the fixed default
    pub fn base_seed(&self) -> u64 {
        self.seed.unwrap_or(defaults::SEED)
    }

    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_steps(mut self, max_steps: Option<u64>) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_liveness_threshold(mut self, threshold: Option<u64>) -> Self {
        self.liveness_threshold = threshold;
        self
    }

    pub fn with_stop_at_first_bug(mut self, stop: bool) -> Self {
        self.stop_at_first_bug = stop;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_qlearning(mut self, params: QLearningParams) -> Self {
        self.qlearning = params;
        self
    }
}
