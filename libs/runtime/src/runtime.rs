//! Controlled Runtime
//!
//! One [`Runtime`] exists per iteration. It owns every actor, task, monitor
//! and lock of the program under test and runs them strictly one at a time:
//! the driver loop asks the [`ControlledScheduler`] for the next operation,
//! runs exactly one step of it (one event dispatched to completion for an
//! actor, one poll for a task) and repeats until the program quiesces, a
//! violation is recorded or the step bound is hit.
//!
//! The handle is a cheap `Rc` clone shared with every handler context, task
//! and lock. Interior state lives in `RefCell`s and no borrow is ever held
//! while user code runs: actor behaviors, monitor behaviors and task futures
//! are taken out of their tables for the duration of a step.

use crate::actors::machine::{MachineKind, StateTable};
use crate::actors::mailbox::Dequeued;
use crate::actors::registry::{ActorRegistry, Delivery, DropReason, DroppedEvent};
use crate::actors::{ActorBehavior, ActorInstance, Context, StateFilter, StateMachine};
use crate::monitor::{Monitor, MonitorBehavior, MonitorContext, MonitorInstance, MonitorSet};
use crate::scheduler::{Acquisition, ControlledScheduler, OperationStatus};
use crate::task::TaskFuture;
use crossbeam_channel::Sender;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hasher;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};
use strategies::ExplorationStrategy;
use tracing::{debug, error, info, trace, warn};
use types::{
    type_label, ActorId, Error, Event, LockId, OperationId, OperationKind, ProgramState, Result,
    SchedulableOperation, Schedule, StateHasher,
};

/// Per-iteration limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Stop the iteration (without a bug) after this many scheduling steps
    pub max_steps: Option<u64>,
    /// Report a liveness violation once a monitor stays hot this long
    pub liveness_threshold: Option<u64>,
}

/// Validated state tables, built once per machine type and shared by every
/// iteration of one engine worker
#[derive(Clone, Default)]
pub(crate) struct TableCache {
    tables: Rc<RefCell<HashMap<TypeId, Rc<dyn Any>>>>,
}

impl TableCache {
    fn get_or_build<T: 'static>(&self, build: impl FnOnce() -> Result<T>) -> Result<Rc<T>> {
        let key = TypeId::of::<T>();
        let cached = self.tables.borrow().get(&key).cloned();
        if let Some(table) = cached {
            return table.downcast::<T>().map_err(|_| {
                Error::configuration("state table cache holds a mismatched entry", None)
            });
        }
        let table = Rc::new(build()?);
        self.tables.borrow_mut().insert(key, table.clone());
        Ok(table)
    }

    fn actor_table<M: StateMachine>(&self) -> Result<Rc<StateTable<M::State, M, Context<M>>>> {
        self.get_or_build(|| {
            let mut table = StateTable::new();
            M::configure(&mut table);
            table.validate(type_label::<M>(), MachineKind::Actor)?;
            debug!(machine = type_label::<M>(), "Actor state table built");
            Ok(table)
        })
    }

    fn monitor_table<M: Monitor>(&self) -> Result<Rc<StateTable<M::State, M, MonitorContext<M>>>> {
        self.get_or_build(|| {
            let mut table = StateTable::new();
            M::configure(&mut table);
            table.validate(type_label::<M>(), MachineKind::Monitor)?;
            debug!(monitor = type_label::<M>(), "Monitor state table built");
            Ok(table)
        })
    }
}

#[derive(Default)]
struct IterationStats {
    states: HashSet<u64>,
    events_dispatched: u64,
    bound_hit: bool,
}

/// Everything the engine keeps from a finished iteration
pub(crate) struct IterationOutcome {
    pub violation: Option<Error>,
    pub schedule: Schedule,
    pub steps: u64,
    pub bound_hit: bool,
    pub states: HashSet<u64>,
    pub events_dispatched: u64,
    pub strategy: Option<Box<dyn ExplorationStrategy>>,
}

struct RuntimeInner {
    settings: RuntimeSettings,
    scheduler: RefCell<ControlledScheduler>,
    actors: RefCell<ActorRegistry>,
    monitors: RefCell<MonitorSet>,
    tasks: RefCell<BTreeMap<OperationId, TaskFuture>>,
    tables: TableCache,
    violation: RefCell<Option<Error>>,
    stats: RefCell<IterationStats>,
    dropped: Option<Sender<DroppedEvent>>,
}

/// Handle to the controlled runtime of one iteration
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub(crate) fn new(
        settings: RuntimeSettings,
        strategy: Box<dyn ExplorationStrategy>,
        tables: TableCache,
        dropped: Option<Sender<DroppedEvent>>,
    ) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                settings,
                scheduler: RefCell::new(ControlledScheduler::new(strategy)),
                actors: RefCell::new(ActorRegistry::new()),
                monitors: RefCell::new(MonitorSet::default()),
                tasks: RefCell::new(BTreeMap::new()),
                tables,
                violation: RefCell::new(None),
                stats: RefCell::new(IterationStats::default()),
                dropped,
            }),
        }
    }

    // ---------------------------------------------------------------
    // Actors
    // ---------------------------------------------------------------

    /// Create an actor with a fresh id; it is started by its first step
    pub fn create_actor<M: StateMachine>(
        &self,
        machine: M,
        init: Option<Event>,
    ) -> Result<ActorId> {
        let id = self.inner.actors.borrow_mut().allocate_id();
        self.bind_actor(id, machine, init)
    }

    /// Create the actor bound to `name`, or return the existing one
    pub fn create_actor_with_name<M: StateMachine>(
        &self,
        name: &str,
        machine: M,
        init: Option<Event>,
    ) -> Result<ActorId> {
        let id = self.actor_id_from_name(name);
        if self.inner.actors.borrow().is_bound(id) {
            debug!(actor = %id, name, "Actor already exists");
            return Ok(id);
        }
        self.bind_actor(id, machine, init)
    }

    /// Bind a machine to an id obtained from [`Runtime::actor_id_from_name`]
    pub fn create_actor_with_id<M: StateMachine>(
        &self,
        id: ActorId,
        machine: M,
        init: Option<Event>,
    ) -> Result<ActorId> {
        self.bind_actor(id, machine, init)
    }

    /// Id reserved for `name`; the same name always maps to the same id
    pub fn actor_id_from_name(&self, name: &str) -> ActorId {
        self.inner.actors.borrow_mut().id_for_name(name)
    }

    fn bind_actor<M: StateMachine>(
        &self,
        id: ActorId,
        machine: M,
        init: Option<Event>,
    ) -> Result<ActorId> {
        self.inner.actors.borrow().check_bindable(id)?;
        let table = self.inner.tables.actor_table::<M>()?;
        let name = type_label::<M>();
        let op = self
            .inner
            .scheduler
            .borrow_mut()
            .register_operation(OperationKind::Actor, Some(id), name);
        let behavior: Box<dyn ActorBehavior> =
            Box::new(ActorInstance::new(id, machine, table, init));
        self.inner.actors.borrow_mut().bind(id, op, name, behavior)?;
        debug!(actor = %id, operation = %op, machine = name, "Actor created");
        Ok(id)
    }

    /// Enqueue `payload` for `target`
    pub fn send<E: Any + Debug>(&self, target: ActorId, payload: E) {
        self.send_event(target, Event::new(payload));
    }

    pub fn send_event(&self, target: ActorId, event: Event) {
        let name = event.name();
        let delivery = self.inner.actors.borrow_mut().deliver(target, event);
        match delivery {
            Delivery::Queued => trace!(%target, event = name, "Event enqueued"),
            Delivery::Dropped(event, reason) => self.notify_dropped(target, &event, reason),
        }
    }

    fn notify_dropped(&self, target: ActorId, event: &Event, reason: DropReason) {
        warn!(%target, event = event.name(), %reason, "Event dropped");
        if let Some(tx) = &self.inner.dropped {
            let _ = tx.send(DroppedEvent {
                target,
                event: event.name(),
                reason,
            });
        }
    }

    pub fn is_actor_halted(&self, id: ActorId) -> bool {
        self.inner.actors.borrow().is_halted(id)
    }

    /// Current state of a live actor, as `Debug` text
    pub fn actor_state(&self, id: ActorId) -> Option<String> {
        self.inner.actors.borrow().state_name(id)
    }

    /// `Type[State]` of a live actor
    pub fn describe_actor(&self, id: ActorId) -> Option<String> {
        self.inner.actors.borrow().describe(id)
    }

    /// Events waiting in an actor's mailbox
    pub fn pending_events(&self, id: ActorId) -> usize {
        self.inner.actors.borrow().queued(id)
    }

    pub(crate) fn dequeue(&self, id: ActorId, filter: &StateFilter) -> Dequeued {
        self.inner.actors.borrow_mut().dequeue(id, filter)
    }

    pub(crate) fn note_dispatch(&self) {
        self.inner.stats.borrow_mut().events_dispatched += 1;
    }

    // ---------------------------------------------------------------
    // Monitors
    // ---------------------------------------------------------------

    /// Register a monitor; its start state is entered immediately
    pub fn register_monitor<M: Monitor>(&self, monitor: M) -> Result<()> {
        let type_id = TypeId::of::<M>();
        let name = type_label::<M>();
        if self.inner.monitors.borrow().contains(type_id) {
            return Err(Error::configuration(
                format!("monitor {} is already registered", name),
                Some("monitor"),
            ));
        }
        let table = self.inner.tables.monitor_table::<M>()?;
        let mut behavior: Box<dyn MonitorBehavior> = Box::new(MonitorInstance::new(monitor, table));
        behavior.start(self)?;
        let step = self.steps();
        self.inner
            .monitors
            .borrow_mut()
            .insert(type_id, name, behavior, step);
        Ok(())
    }

    /// Deliver `event` synchronously to the monitor of type `M`
    pub fn invoke_monitor<M: Monitor>(&self, event: Event) -> Result<()> {
        self.deliver_to_monitor(TypeId::of::<M>(), type_label::<M>(), event)
    }

    pub fn monitor<M: Monitor, E: Any + Debug>(&self, payload: E) -> Result<()> {
        self.invoke_monitor::<M>(Event::new(payload))
    }

    /// Deliver `event` to every monitor whose table binds its kind
    pub fn broadcast(&self, event: Event) -> Result<()> {
        let targets = self.inner.monitors.borrow().handling(event.kind());
        for (type_id, name) in targets {
            self.deliver_to_monitor(type_id, name, event.clone())?;
        }
        Ok(())
    }

    /// Current state of the monitor of type `M`
    pub fn monitor_state<M: Monitor>(&self) -> Option<String> {
        self.inner.monitors.borrow().state_name(TypeId::of::<M>())
    }

    fn deliver_to_monitor(&self, type_id: TypeId, name: &str, event: Event) -> Result<()> {
        let mut behavior = self.inner.monitors.borrow_mut().take(type_id, name)?;
        trace!(monitor = name, event = event.name(), "Monitor invoked");
        let result = behavior.deliver(self, event);
        let step = self.steps();
        self.inner
            .monitors
            .borrow_mut()
            .restore(type_id, behavior, step);
        result
    }

    // ---------------------------------------------------------------
    // Controlled nondeterminism and checks
    // ---------------------------------------------------------------

    pub fn random_boolean(&self) -> Result<bool> {
        self.random_boolean_with(2)
    }

    /// `true` with probability `1 / max_value`
    pub fn random_boolean_with(&self, max_value: u32) -> Result<bool> {
        let state = self.program_state();
        let choice = self
            .inner
            .scheduler
            .borrow_mut()
            .choose_boolean(&state, max_value);
        choice.map_err(|err| self.fail(err))
    }

    /// Integer in `0..max_value`
    pub fn random_integer(&self, max_value: u32) -> Result<u32> {
        let state = self.program_state();
        let choice = self
            .inner
            .scheduler
            .borrow_mut()
            .choose_integer(&state, max_value);
        choice.map_err(|err| self.fail(err))
    }

    /// Record an assertion violation unless `condition` holds
    pub fn assert(&self, condition: bool, message: impl Into<String>) -> Result<()> {
        if condition {
            Ok(())
        } else {
            Err(self.fail(Error::assertion(message)))
        }
    }

    fn fail(&self, err: Error) -> Error {
        self.record_violation(err.clone());
        err
    }

    // ---------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------

    /// Scheduling steps taken so far
    pub fn steps(&self) -> u64 {
        self.inner.scheduler.borrow().steps()
    }

    /// Operation currently being stepped, if a task is running
    pub fn current_operation(&self) -> Option<OperationId> {
        self.inner.scheduler.borrow().current()
    }

    /// Decisions recorded so far
    pub fn schedule(&self) -> Schedule {
        self.inner.scheduler.borrow().schedule().clone()
    }

    pub fn has_violation(&self) -> bool {
        self.inner.violation.borrow().is_some()
    }

    // ---------------------------------------------------------------
    // Task and lock plumbing
    // ---------------------------------------------------------------

    pub(crate) fn register_task(&self, name: &str, future: TaskFuture) -> OperationId {
        let op = self
            .inner
            .scheduler
            .borrow_mut()
            .register_operation(OperationKind::Task, None, name);
        self.inner.tasks.borrow_mut().insert(op, future);
        debug!(operation = %op, name, "Task spawned");
        op
    }

    pub(crate) fn is_operation_completed(&self, op: OperationId) -> bool {
        self.inner.scheduler.borrow().is_completed(op)
    }

    pub(crate) fn block_current(&self, status: OperationStatus) {
        self.inner.scheduler.borrow_mut().block_current(status);
    }

    pub(crate) fn create_lock(&self) -> LockId {
        self.inner.scheduler.borrow_mut().create_lock()
    }

    fn running_task(&self, what: &str) -> Result<OperationId> {
        self.current_operation().ok_or_else(|| {
            Error::configuration(
                format!("{} is only allowed inside a controlled task", what),
                Some("lock"),
            )
        })
    }

    /// `true` once the running task owns `lock`
    pub(crate) fn acquire_lock(&self, lock: LockId) -> Result<bool> {
        let op = self.running_task("acquiring a lock")?;
        let outcome = self.inner.scheduler.borrow_mut().acquire(lock, op)?;
        Ok(outcome == Acquisition::Acquired)
    }

    pub(crate) fn release_lock(&self, lock: LockId) {
        self.inner.scheduler.borrow_mut().release(lock);
    }

    pub(crate) fn wait_on_lock(&self, lock: LockId) -> Result<()> {
        let op = self.running_task("waiting on a lock")?;
        self.inner.scheduler.borrow_mut().enter_wait(lock, op)
    }

    pub(crate) fn pulse_lock(&self, lock: LockId, all: bool) -> Result<usize> {
        self.inner.scheduler.borrow_mut().pulse(lock, all)
    }

    pub(crate) fn lock_owner(&self, lock: LockId) -> Option<OperationId> {
        self.inner.scheduler.borrow().lock_owner(lock)
    }

    // ---------------------------------------------------------------
    // Driver
    // ---------------------------------------------------------------

    /// Keep the first violation of the iteration
    pub(crate) fn record_violation(&self, err: Error) {
        let mut violation = self.inner.violation.borrow_mut();
        if violation.is_none() {
            if err.is_fatal() {
                error!(category = err.category(), error = %err, "Test error");
            } else {
                info!(category = err.category(), error = %err, "Bug found");
            }
            *violation = Some(err);
        }
    }

    /// Run scheduling steps until quiescence, a violation or the step bound
    pub(crate) fn run_loop(&self) {
        loop {
            if self.has_violation() {
                break;
            }
            if let Some(max_steps) = self.inner.settings.max_steps {
                if self.steps() >= max_steps {
                    debug!(max_steps, "Step bound reached");
                    self.inner.stats.borrow_mut().bound_hit = true;
                    break;
                }
            }

            let enabled = self.enabled_operations();
            if enabled.is_empty() {
                self.check_quiescence();
                break;
            }

            let state = self.program_state();
            self.inner.stats.borrow_mut().states.insert(state.hash);
            let chosen = self
                .inner
                .scheduler
                .borrow_mut()
                .schedule_next(&state, &enabled);
            match chosen {
                Ok(op) => {
                    if let Err(err) = self.execute(op) {
                        self.record_violation(err);
                    }
                }
                Err(err) => {
                    self.record_violation(err);
                    break;
                }
            }
            self.check_liveness_threshold();
        }
    }

    fn enabled_operations(&self) -> Vec<SchedulableOperation> {
        let scheduler = self.inner.scheduler.borrow();
        let actors = self.inner.actors.borrow();
        scheduler
            .operations()
            .filter_map(|(id, entry)| match entry.kind {
                OperationKind::Task => {
                    scheduler
                        .is_task_enabled(entry)
                        .then(|| SchedulableOperation {
                            id,
                            kind: OperationKind::Task,
                            marker: entry.marker,
                            hashed_state: None,
                        })
                }
                OperationKind::Actor => {
                    let slot = entry.actor.and_then(|actor| actors.slot(actor))?;
                    slot.is_enabled().then(|| SchedulableOperation {
                        id,
                        kind: OperationKind::Actor,
                        marker: slot.marker(),
                        hashed_state: slot.hashed_state,
                    })
                }
            })
            .collect()
    }

    /// Hash of every live operation and monitor
    fn program_state(&self) -> ProgramState {
        let scheduler = self.inner.scheduler.borrow();
        let actors = self.inner.actors.borrow();
        let monitors = self.inner.monitors.borrow();
        let mut hasher = StateHasher::new();

        for (id, entry) in scheduler.operations() {
            if entry.status == OperationStatus::Completed {
                continue;
            }
            hasher.combine(id.value());
            match entry.kind {
                OperationKind::Task => {
                    hasher.write_u8(0);
                    hasher.combine(entry.marker);
                }
                OperationKind::Actor => {
                    hasher.write_u8(1);
                    if let Some(slot) = entry.actor.and_then(|actor| actors.slot(actor)) {
                        hasher
                            .combine(slot.marker())
                            .combine(slot.hashed_state.unwrap_or(0));
                    }
                }
            }
        }
        for hash in monitors.state_hashes() {
            hasher.combine(hash);
        }
        ProgramState::new(hasher.finish(), scheduler.steps())
    }

    fn execute(&self, op: OperationId) -> Result<()> {
        let target = {
            let scheduler = self.inner.scheduler.borrow();
            scheduler.entry(op).map(|entry| (entry.kind, entry.actor))
        };
        match target {
            Some((OperationKind::Task, _)) => self.poll_task(op),
            Some((OperationKind::Actor, Some(actor))) => self.step_actor(op, actor),
            _ => Err(Error::configuration(
                format!("{} cannot be executed", op),
                None,
            )),
        }
    }

    fn poll_task(&self, op: OperationId) -> Result<()> {
        let future = self.inner.tasks.borrow_mut().remove(&op);
        let mut future = future.ok_or_else(|| {
            Error::configuration(format!("{} has no pending continuation", op), None)
        })?;

        self.inner.scheduler.borrow_mut().resume_task(op);
        let mut cx = TaskContext::from_waker(futures::task::noop_waker_ref());
        let poll = future.as_mut().poll(&mut cx);
        self.inner.scheduler.borrow_mut().set_current(None);

        match poll {
            Poll::Pending => {
                self.inner.tasks.borrow_mut().insert(op, future);
                Ok(())
            }
            Poll::Ready(result) => {
                drop(future);
                self.inner.scheduler.borrow_mut().complete_operation(op);
                result
            }
        }
    }

    fn step_actor(&self, op: OperationId, actor: ActorId) -> Result<()> {
        let behavior = self.inner.actors.borrow_mut().take_behavior(actor);
        let mut behavior = behavior.ok_or_else(|| {
            Error::configuration(format!("{} is already running", actor), None)
        })?;

        let result = behavior.step(self);

        if behavior.is_halted() {
            let leftovers = self.inner.actors.borrow_mut().retire(actor);
            self.inner.scheduler.borrow_mut().complete_operation(op);
            debug!(%actor, dropped = leftovers.len(), "Actor halted");
            for event in &leftovers {
                self.notify_dropped(actor, event, DropReason::HaltedActor);
            }
            drop(behavior);
        } else {
            self.inner.actors.borrow_mut().restore(actor, behavior);
        }
        result
    }

    fn check_quiescence(&self) {
        let blocked = self.inner.scheduler.borrow().blocked_tasks();
        if !blocked.is_empty() {
            self.record_violation(Error::deadlock(format!(
                "no operation is enabled; {}",
                blocked.join("; ")
            )));
            return;
        }
        let hot = self.inner.monitors.borrow().hot_at_quiescence();
        if let Some(err) = hot {
            self.record_violation(err);
        }
    }

    fn check_liveness_threshold(&self) {
        let Some(threshold) = self.inner.settings.liveness_threshold else {
            return;
        };
        let overdue = self.inner.monitors.borrow().overdue(self.steps(), threshold);
        if let Some(err) = overdue {
            self.record_violation(err);
        }
    }

    /// Drop every future, actor and monitor, breaking handle cycles
    pub(crate) fn teardown(&self) {
        let tasks = std::mem::take(&mut *self.inner.tasks.borrow_mut());
        drop(tasks);
        let actors = self.inner.actors.borrow_mut().drain();
        drop(actors);
        let monitors = self.inner.monitors.borrow_mut().drain();
        drop(monitors);
    }

    pub(crate) fn finish(&self) -> IterationOutcome {
        let mut scheduler = self.inner.scheduler.borrow_mut();
        let mut stats = self.inner.stats.borrow_mut();
        IterationOutcome {
            violation: self.inner.violation.borrow_mut().take(),
            schedule: scheduler.take_schedule(),
            steps: scheduler.steps(),
            bound_hit: stats.bound_hit,
            states: std::mem::take(&mut stats.states),
            events_dispatched: stats.events_dispatched,
            strategy: scheduler.take_strategy(),
        }
    }
}
