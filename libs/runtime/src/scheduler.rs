//! Controlled Scheduler
//!
//! Sole authority over which operation runs next. Every actor event loop and
//! every task is registered as an operation with a status; the scheduler
//! decides enabledness for tasks from that status and from the lock table it
//! owns, asks the strategy to choose at each scheduling point and records
//! every decision into the iteration's [`Schedule`].

use std::collections::{BTreeMap, VecDeque};
use strategies::ExplorationStrategy;
use tracing::trace;
use types::{
    ActorId, Decision, Error, LockId, OperationId, OperationKind, ProgramState, Result,
    SchedulableOperation, Schedule,
};

/// Why an operation can or cannot run
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OperationStatus {
    Enabled,
    /// Waiting for a held lock to become free
    BlockedOnLock(LockId),
    /// Inside `wait`, until pulsed
    WaitingForPulse(LockId),
    /// Awaiting other operations (all of them, or any one)
    Joining {
        targets: Vec<OperationId>,
        all: bool,
    },
    Completed,
}

#[derive(Debug)]
pub(crate) struct OperationEntry {
    pub kind: OperationKind,
    pub status: OperationStatus,
    /// Scheduling points passed (tasks)
    pub marker: u64,
    pub actor: Option<ActorId>,
    pub label: String,
}

#[derive(Debug, Default)]
struct LockState {
    owner: Option<OperationId>,
    wait_set: VecDeque<OperationId>,
}

/// Outcome of an acquire attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Acquisition {
    Acquired,
    Blocked,
}

pub(crate) struct ControlledScheduler {
    strategy: Option<Box<dyn ExplorationStrategy>>,
    operations: BTreeMap<OperationId, OperationEntry>,
    locks: Vec<LockState>,
    next_operation: u64,
    current: Option<OperationId>,
    schedule: Schedule,
    steps: u64,
}

impl ControlledScheduler {
    pub fn new(strategy: Box<dyn ExplorationStrategy>) -> Self {
        Self {
            strategy: Some(strategy),
            operations: BTreeMap::new(),
            locks: Vec::new(),
            next_operation: 1,
            current: None,
            schedule: Schedule::new(),
            steps: 0,
        }
    }

    pub fn register_operation(
        &mut self,
        kind: OperationKind,
        actor: Option<ActorId>,
        name: &str,
    ) -> OperationId {
        let id = OperationId::new(self.next_operation);
        self.next_operation += 1;
        let label = format!("{}#{}", name, id.value());
        trace!(operation = %id, %label, "Operation registered");
        self.operations.insert(
            id,
            OperationEntry {
                kind,
                status: OperationStatus::Enabled,
                marker: 0,
                actor,
                label,
            },
        );
        id
    }

    pub fn complete_operation(&mut self, op: OperationId) {
        if let Some(entry) = self.operations.get_mut(&op) {
            entry.status = OperationStatus::Completed;
            trace!(operation = %op, label = %entry.label, "Operation completed");
        }
    }

    /// Ask the strategy for the next operation and record the decision
    pub fn schedule_next(
        &mut self,
        state: &ProgramState,
        enabled: &[SchedulableOperation],
    ) -> Result<OperationId> {
        let strategy = self.strategy_mut()?;
        let chosen = strategy.choose_operation(state, enabled)?;
        if !enabled.iter().any(|op| op.id == chosen) {
            return Err(Error::configuration(
                format!("strategy chose {} which is not enabled", chosen),
                Some("strategy"),
            ));
        }
        self.schedule.push(Decision::Operation(chosen));
        self.steps += 1;
        trace!(
            step = self.steps,
            operation = %chosen,
            enabled = enabled.len(),
            "Scheduling decision"
        );
        Ok(chosen)
    }

    pub fn choose_boolean(&mut self, state: &ProgramState, max_value: u32) -> Result<bool> {
        let value = self.strategy_mut()?.choose_boolean(state, max_value)?;
        self.schedule.push(Decision::Boolean(value));
        trace!(step = self.steps, value, "Boolean choice");
        Ok(value)
    }

    pub fn choose_integer(&mut self, state: &ProgramState, max_value: u32) -> Result<u32> {
        let value = self.strategy_mut()?.choose_integer(state, max_value)?;
        self.schedule.push(Decision::Integer(value));
        trace!(step = self.steps, value, max_value, "Integer choice");
        Ok(value)
    }

    fn strategy_mut(&mut self) -> Result<&mut Box<dyn ExplorationStrategy>> {
        self.strategy
            .as_mut()
            .ok_or_else(|| Error::configuration("scheduler has no strategy", Some("strategy")))
    }

    pub fn take_strategy(&mut self) -> Option<Box<dyn ExplorationStrategy>> {
        self.strategy.take()
    }

    pub fn take_schedule(&mut self) -> Schedule {
        std::mem::take(&mut self.schedule)
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn current(&self) -> Option<OperationId> {
        self.current
    }

    pub fn set_current(&mut self, op: Option<OperationId>) {
        self.current = op;
    }

    pub fn entry(&self, op: OperationId) -> Option<&OperationEntry> {
        self.operations.get(&op)
    }

    pub fn operations(&self) -> impl Iterator<Item = (OperationId, &OperationEntry)> {
        self.operations.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn set_status(&mut self, op: OperationId, status: OperationStatus) {
        if let Some(entry) = self.operations.get_mut(&op) {
            if entry.status != OperationStatus::Completed {
                entry.status = status;
            }
        }
    }

    /// Suspend the running operation with the given status
    pub fn block_current(&mut self, status: OperationStatus) {
        if let Some(op) = self.current {
            self.set_status(op, status);
        }
    }

    /// Resume bookkeeping before a task is polled
    pub fn resume_task(&mut self, op: OperationId) {
        if let Some(entry) = self.operations.get_mut(&op) {
            entry.status = OperationStatus::Enabled;
            entry.marker += 1;
        }
        self.current = Some(op);
    }

    pub fn is_completed(&self, op: OperationId) -> bool {
        matches!(
            self.operations.get(&op).map(|e| &e.status),
            Some(OperationStatus::Completed)
        )
    }

    pub fn is_task_enabled(&self, entry: &OperationEntry) -> bool {
        match &entry.status {
            OperationStatus::Enabled => true,
            OperationStatus::BlockedOnLock(lock) => self
                .locks
                .get(lock.value() as usize)
                .map_or(false, |l| l.owner.is_none()),
            OperationStatus::WaitingForPulse(_) => false,
            OperationStatus::Joining { targets, all: true } => {
                targets.iter().all(|t| self.is_completed(*t))
            }
            OperationStatus::Joining { targets, all: false } => {
                targets.iter().any(|t| self.is_completed(*t))
            }
            OperationStatus::Completed => false,
        }
    }

    /// Human readable description of every blocked task
    pub fn blocked_tasks(&self) -> Vec<String> {
        self.operations
            .values()
            .filter(|e| e.kind == OperationKind::Task)
            .filter_map(|e| {
                let reason = match &e.status {
                    OperationStatus::BlockedOnLock(lock) => {
                        let owner = self
                            .locks
                            .get(lock.value() as usize)
                            .and_then(|l| l.owner)
                            .and_then(|o| self.operations.get(&o))
                            .map(|o| o.label.as_str())
                            .unwrap_or("nobody");
                        format!("blocked on {} held by {}", lock, owner)
                    }
                    OperationStatus::WaitingForPulse(lock) => {
                        format!("waiting for a pulse on {}", lock)
                    }
                    OperationStatus::Joining { targets, all } => {
                        let names: Vec<String> = targets
                            .iter()
                            .filter_map(|t| self.operations.get(t))
                            .map(|t| t.label.clone())
                            .collect();
                        format!(
                            "waiting for {} of [{}]",
                            if *all { "all" } else { "any" },
                            names.join(", ")
                        )
                    }
                    OperationStatus::Enabled | OperationStatus::Completed => return None,
                };
                Some(format!("{} {}", e.label, reason))
            })
            .collect()
    }

    pub fn create_lock(&mut self) -> LockId {
        self.locks.push(LockState::default());
        LockId::new((self.locks.len() - 1) as u64)
    }

    fn lock_mut(&mut self, lock: LockId) -> Result<&mut LockState> {
        self.locks
            .get_mut(lock.value() as usize)
            .ok_or_else(|| Error::configuration(format!("unknown lock {}", lock), None))
    }

    pub fn lock_owner(&self, lock: LockId) -> Option<OperationId> {
        self.locks.get(lock.value() as usize).and_then(|l| l.owner)
    }

    /// Try to take `lock` for `op`; blocks `op` if the lock is held or `op`
    /// is still in the wait set
    pub fn acquire(&mut self, lock: LockId, op: OperationId) -> Result<Acquisition> {
        let state = self.lock_mut(lock)?;
        let outcome = if state.wait_set.contains(&op) {
            OperationStatus::WaitingForPulse(lock)
        } else if state.owner.is_none() {
            state.owner = Some(op);
            trace!(%lock, operation = %op, "Lock acquired");
            return Ok(Acquisition::Acquired);
        } else {
            OperationStatus::BlockedOnLock(lock)
        };
        trace!(%lock, operation = %op, status = ?outcome, "Lock acquire blocked");
        self.set_status(op, outcome);
        Ok(Acquisition::Blocked)
    }

    pub fn release(&mut self, lock: LockId) {
        if let Ok(state) = self.lock_mut(lock) {
            let previous = state.owner.take();
            trace!(%lock, owner = ?previous, "Lock released");
        }
    }

    /// Release `lock` held by `op` and park `op` in the wait set
    pub fn enter_wait(&mut self, lock: LockId, op: OperationId) -> Result<()> {
        let state = self.lock_mut(lock)?;
        if state.owner != Some(op) {
            return Err(Error::configuration(
                format!("{} waits on {} without holding it", op, lock),
                None,
            ));
        }
        state.owner = None;
        state.wait_set.push_back(op);
        trace!(%lock, operation = %op, "Waiting for pulse");
        self.set_status(op, OperationStatus::WaitingForPulse(lock));
        Ok(())
    }

    /// Move the longest waiter (or every waiter) back to competing for `lock`
    pub fn pulse(&mut self, lock: LockId, all: bool) -> Result<usize> {
        let state = self.lock_mut(lock)?;
        let count = if all { state.wait_set.len() } else { state.wait_set.len().min(1) };
        let woken: Vec<OperationId> = state.wait_set.drain(..count).collect();
        for op in &woken {
            self.set_status(*op, OperationStatus::BlockedOnLock(lock));
        }
        trace!(%lock, woken = woken.len(), all, "Pulse");
        Ok(woken.len())
    }
}
