//! # Interleave Configuration
//!
//! Settings for one exploration session: how many iterations to run, which
//! strategy picks interleavings, how long an iteration may run and which seed
//! makes the session reproducible.
//!
//! ## Usage
//!
//! ```rust
//! use config::{Configuration, StrategyKind};
//!
//! let config = Configuration::default()
//!     .with_iterations(500)
//!     .with_strategy(StrategyKind::Dfs)
//!     .with_max_steps(Some(2_000));
//! assert!(config.validate().is_ok());
//! ```

pub mod defaults;
pub mod session;

pub use session::{Configuration, QLearningParams, StrategyKind};
