//! Strategy-facing view of the program at a scheduling point

use crate::ids::OperationId;
use serde::{Deserialize, Serialize};

/// What kind of work an operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// An actor's event loop
    Actor,
    /// A controlled task
    Task,
}

/// An enabled operation as presented to a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulableOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    /// Program-counter-like position: scheduling points passed for tasks, a
    /// hash of the state stack and queued event kinds for actors
    pub marker: u64,
    /// Optional user-supplied hash of the operation's private state
    pub hashed_state: Option<u64>,
}

/// Abstracted program state at one scheduling point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramState {
    /// Deterministic hash over every live operation and monitor
    pub hash: u64,
    /// Scheduling steps taken so far in this iteration
    pub step: u64,
}

impl ProgramState {
    pub fn new(hash: u64, step: u64) -> Self {
        Self { hash, step }
    }
}
