//! Actors
//!
//! An actor is a user type implementing [`StateMachine`] plus a mailbox. Its
//! event loop is one schedulable operation: each time the scheduler picks it,
//! the actor dequeues one eligible event and runs it to completion (raised
//! events included) without interleaving with anything else.

mod context;
pub(crate) mod machine;
pub(crate) mod mailbox;
pub(crate) mod registry;

pub use context::Context;
pub use machine::{StateFilter, StateId, StateTable, Temperature};
pub use registry::{DropReason, DroppedEvent};

pub(crate) use context::ActorInstance;

use crate::runtime::Runtime;
use types::Result;

/// A user-defined actor type
///
/// The state table is built once per type and shared by every instance.
///
/// ```rust,ignore
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum State { Idle, Busy }
///
/// struct Worker;
///
/// impl StateMachine for Worker {
///     type State = State;
///
///     fn configure(table: &mut ActorTable<Self>) {
///         table
///             .start(State::Idle)
///             .on_goto::<Job>(State::Idle, State::Busy)
///             .on_goto::<Done>(State::Busy, State::Idle);
///     }
/// }
/// ```
pub trait StateMachine: Sized + 'static {
    type State: StateId;

    /// Declare states and handlers
    fn configure(table: &mut StateTable<Self::State, Self, Context<Self>>);

    /// Optional hash of the actor's private fields, folded into the
    /// program-state abstraction
    fn hashed_state(&self) -> Option<u64> {
        None
    }
}

/// State table of an actor type
pub type ActorTable<M> = StateTable<<M as StateMachine>::State, M, Context<M>>;

/// Type-erased actor instance driven by the runtime
pub(crate) trait ActorBehavior {
    /// Start the actor, or dispatch one event to completion
    fn step(&mut self, runtime: &Runtime) -> Result<()>;
    fn is_started(&self) -> bool;
    fn is_halted(&self) -> bool;
    fn filter(&self) -> StateFilter;
    fn stack_hash(&self) -> u64;
    fn hashed_state(&self) -> Option<u64>;
    fn state_name(&self) -> Option<String>;
}
