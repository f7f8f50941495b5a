//! # Interleave Runtime
//!
//! Systematic concurrency testing for actor programs and controlled tasks.
//! The program under test runs on a single logical thread; every point where
//! real concurrency could interleave (choosing the next actor event, polling a
//! task, acquiring a lock, a nondeterministic choice) becomes a decision of
//! the [`ExplorationStrategy`](strategies::ExplorationStrategy). Running the
//! same test many times explores many interleavings, and every buggy one comes
//! with a [`Schedule`](types::Schedule) that replays it exactly.
//!
//! ## Architecture
//!
//! ```text
//! TestEngine ── per iteration ──▶ Runtime ──▶ ControlledScheduler ──▶ strategy
//!                                   │
//!              ┌────────────────────┼────────────────────┐
//!           actors               tasks               monitors
//!   (state tables, mailboxes)  (futures, locks)  (hot/cold liveness)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use runtime::{ControlledLock, TestEngine};
//! use config::{Configuration, StrategyKind};
//!
//! let engine = TestEngine::new(Configuration::default().with_strategy(StrategyKind::Dfs));
//! let report = engine.run(|rt| {
//!     let counter = ControlledLock::new(rt, 0u32);
//!     for _ in 0..2 {
//!         let counter = counter.clone();
//!         let rt2 = rt.clone();
//!         rt.spawn(async move {
//!             let value = *counter.acquire().await?;
//!             rt2.explore_context_switch().await;
//!             *counter.acquire().await? = value + 1;
//!             Ok(())
//!         });
//!     }
//!     Ok(())
//! })?;
//! ```

pub mod actors;
pub mod engine;
pub mod monitor;
pub(crate) mod runtime;
pub(crate) mod scheduler;
pub mod sync;
pub mod task;

pub use actors::{
    ActorTable, Context, DropReason, DroppedEvent, StateFilter, StateId, StateMachine, StateTable,
    Temperature,
};
pub use engine::{BugReport, Coverage, TestEngine, TestReport};
pub use monitor::{Monitor, MonitorContext, MonitorTable};
pub use runtime::{Runtime, RuntimeSettings};
pub use sync::{ControlledLock, LockGuard, WakeMode};
pub use task::{when_all, when_any, TaskHandle};

pub use types::{
    ActorId, DefaultEvent, Error, Event, EventKind, Halt, OperationId, Result, Schedule,
    ViolationKind,
};
