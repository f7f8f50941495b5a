//! # Interleave Shared Types
//!
//! Vocabulary shared by every crate of the interleave systematic testing
//! engine: identifiers handed out by the controlled runtime, the immutable
//! [`Event`] envelope exchanged between actors, the recorded [`Schedule`]
//! that makes an iteration replayable, and the [`Error`] taxonomy used to
//! report bugs.
//!
//! ## Design Philosophy
//!
//! - **No ambient state**: identifiers are plain values minted by a runtime
//!   instance, never by process-wide counters.
//! - **Closed event kinds**: an event's kind is the `TypeId` of its payload,
//!   so handler tables are explicit maps built once per machine type.
//! - **Deterministic hashing**: program-state hashes use a fixed-seed hasher so
//!   two runs of the same schedule observe identical abstractions.
//!
//! ## Quick Start
//!
//! ```rust
//! use types::{Event, Halt};
//!
//! #[derive(Debug)]
//! struct Ping { round: u32 }
//!
//! let event = Event::new(Ping { round: 1 });
//! assert_eq!(event.downcast_ref::<Ping>().map(|p| p.round), Some(1));
//! assert!(Event::new(Halt).is::<Halt>());
//! ```

pub mod error;
pub mod event;
pub mod hashing;
pub mod ids;
pub mod schedule;
pub mod snapshot;

pub use error::{Error, Result, ViolationKind};
pub use event::{type_label, DefaultEvent, Event, EventKind, Halt};
pub use hashing::{hash_of, StateHasher, StateHasherBuilder};
pub use ids::{ActorId, LockId, OperationId};
pub use schedule::{Decision, Schedule};
pub use snapshot::{OperationKind, ProgramState, SchedulableOperation};
