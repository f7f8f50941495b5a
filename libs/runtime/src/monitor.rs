//! Safety and Liveness Monitors
//!
//! A monitor is a state machine that observes events published by the
//! program under test. It is never scheduled: publishing runs the monitor's
//! handler synchronously, to completion, inside the publisher's step. Monitor
//! states may be tagged hot (an obligation is pending) or cold (every
//! obligation is discharged); the runtime reports a liveness violation when
//! a monitor is still hot at quiescence or stays hot for longer than the
//! configured threshold.

use crate::actors::machine::{Effects, HandlerContext, MachineCore, StateTable, Transition};
use crate::actors::{StateId, Temperature};
use crate::runtime::Runtime;
use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::hash::Hasher;
use std::rc::Rc;
use tracing::debug;
use types::{type_label, Error, Event, EventKind, Result, StateHasher};

/// A user-defined monitor type
pub trait Monitor: Sized + 'static {
    type State: StateId;

    /// Declare states, handlers and hot/cold tags
    fn configure(table: &mut StateTable<Self::State, Self, MonitorContext<Self>>);

    /// Optional hash of the monitor's private fields
    fn hashed_state(&self) -> Option<u64> {
        None
    }
}

/// State table of a monitor type
pub type MonitorTable<M> = StateTable<<M as Monitor>::State, M, MonitorContext<M>>;

/// What a monitor handler can do
pub struct MonitorContext<M: Monitor> {
    runtime: Runtime,
    state: M::State,
    effects: Effects<M::State>,
}

impl<M: Monitor> MonitorContext<M> {
    fn new(runtime: Runtime, state: M::State) -> Self {
        Self {
            runtime,
            state,
            effects: Effects::default(),
        }
    }

    pub fn current_state(&self) -> M::State {
        self.state
    }

    pub fn goto(&mut self, state: M::State) {
        self.effects.transitions.push(Transition::Goto(state));
    }

    pub fn push(&mut self, state: M::State) {
        self.effects.transitions.push(Transition::Push(state));
    }

    pub fn pop(&mut self) {
        self.effects.transitions.push(Transition::Pop);
    }

    pub fn raise<E: Any + Debug>(&mut self, payload: E) {
        self.effects.raised.push(Event::new(payload));
    }

    pub fn raise_event(&mut self, event: Event) {
        self.effects.raised.push(event);
    }

    /// Fail the iteration with an assertion violation unless `condition` holds
    pub fn assert(&self, condition: bool, message: impl Into<String>) -> Result<()> {
        self.runtime.assert(condition, message)
    }
}

impl<M: Monitor> HandlerContext<M::State> for MonitorContext<M> {
    fn into_effects(self) -> Effects<M::State> {
        self.effects
    }
}

/// Type-erased monitor instance
pub(crate) trait MonitorBehavior {
    fn start(&mut self, runtime: &Runtime) -> Result<()>;
    fn deliver(&mut self, runtime: &Runtime, event: Event) -> Result<()>;
    fn declares(&self, kind: EventKind) -> bool;
    fn temperature(&self) -> Temperature;
    fn state_hash(&self) -> u64;
    fn state_name(&self) -> Option<String>;
}

pub(crate) struct MonitorInstance<M: Monitor> {
    core: MachineCore<M::State, M, MonitorContext<M>>,
}

impl<M: Monitor> MonitorInstance<M> {
    pub fn new(monitor: M, table: Rc<MonitorTable<M>>) -> Self {
        Self {
            core: MachineCore::new(monitor, table, type_label::<M>()),
        }
    }
}

impl<M: Monitor> MonitorBehavior for MonitorInstance<M> {
    fn start(&mut self, runtime: &Runtime) -> Result<()> {
        let make = |state: M::State| MonitorContext::<M>::new(runtime.clone(), state);
        self.core.start(&make, None)
    }

    fn deliver(&mut self, runtime: &Runtime, event: Event) -> Result<()> {
        let make = |state: M::State| MonitorContext::<M>::new(runtime.clone(), state);
        self.core.handle(&make, event)
    }

    fn declares(&self, kind: EventKind) -> bool {
        self.core.declares(kind)
    }

    fn temperature(&self) -> Temperature {
        self.core.temperature()
    }

    fn state_hash(&self) -> u64 {
        let mut hasher = StateHasher::new();
        hasher
            .combine(self.core.stack_hash())
            .combine(self.core.machine().hashed_state().unwrap_or(0))
            .finish()
    }

    fn state_name(&self) -> Option<String> {
        self.core.current_state().map(|s| format!("{:?}", s))
    }
}

pub(crate) struct MonitorSlot {
    type_id: TypeId,
    name: &'static str,
    behavior: Option<Box<dyn MonitorBehavior>>,
    hot_since: Option<u64>,
    temperature: Temperature,
    state_hash: u64,
    state_name: Option<String>,
}

impl MonitorSlot {
    fn refresh(&mut self, behavior: &dyn MonitorBehavior, step: u64) {
        self.temperature = behavior.temperature();
        self.state_hash = behavior.state_hash();
        self.state_name = behavior.state_name();
        match self.temperature {
            Temperature::Hot => {
                self.hot_since.get_or_insert(step);
            }
            Temperature::Cold => self.hot_since = None,
        }
    }

    fn state(&self) -> &str {
        self.state_name.as_deref().unwrap_or("?")
    }
}

/// Registered monitors, in registration order
#[derive(Default)]
pub(crate) struct MonitorSet {
    slots: Vec<MonitorSlot>,
}

impl MonitorSet {
    pub fn contains(&self, type_id: TypeId) -> bool {
        self.slots.iter().any(|s| s.type_id == type_id)
    }

    pub fn insert(
        &mut self,
        type_id: TypeId,
        name: &'static str,
        behavior: Box<dyn MonitorBehavior>,
        step: u64,
    ) {
        let mut slot = MonitorSlot {
            type_id,
            name,
            behavior: None,
            hot_since: None,
            temperature: Temperature::Cold,
            state_hash: 0,
            state_name: None,
        };
        slot.refresh(behavior.as_ref(), step);
        slot.behavior = Some(behavior);
        debug!(monitor = name, state = slot.state(), "Monitor registered");
        self.slots.push(slot);
    }

    /// Borrow a monitor out for delivery
    pub fn take(&mut self, type_id: TypeId, name: &str) -> Result<Box<dyn MonitorBehavior>> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.type_id == type_id)
            .ok_or_else(|| {
                Error::configuration(format!("monitor {} is not registered", name), Some("monitor"))
            })?;
        slot.behavior.take().ok_or_else(|| {
            Error::configuration(
                format!("monitor {} received an event while handling another", name),
                Some("monitor"),
            )
        })
    }

    pub fn restore(&mut self, type_id: TypeId, behavior: Box<dyn MonitorBehavior>, step: u64) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.type_id == type_id) {
            slot.refresh(behavior.as_ref(), step);
            slot.behavior = Some(behavior);
        }
    }

    /// Monitors whose table binds `kind`
    pub fn handling(&self, kind: EventKind) -> Vec<(TypeId, &'static str)> {
        self.slots
            .iter()
            .filter(|s| s.behavior.as_ref().map_or(false, |b| b.declares(kind)))
            .map(|s| (s.type_id, s.name))
            .collect()
    }

    pub fn state_hashes(&self) -> impl Iterator<Item = u64> + '_ {
        self.slots.iter().map(|s| s.state_hash)
    }

    /// First monitor hot for more than `threshold` steps
    pub fn overdue(&self, step: u64, threshold: u64) -> Option<Error> {
        self.slots.iter().find_map(|s| {
            let since = s.hot_since?;
            (step.saturating_sub(since) > threshold).then(|| {
                Error::liveness(
                    s.name,
                    format!(
                        "hot state {} for {} steps (threshold {})",
                        s.state(),
                        step - since,
                        threshold
                    ),
                )
            })
        })
    }

    /// First monitor left in a hot state
    pub fn hot_at_quiescence(&self) -> Option<Error> {
        self.slots
            .iter()
            .find(|s| s.temperature == Temperature::Hot)
            .map(|s| {
                Error::liveness(
                    s.name,
                    format!("still in hot state {} when the program stopped", s.state()),
                )
            })
    }

    pub fn state_name(&self, type_id: TypeId) -> Option<String> {
        self.slots
            .iter()
            .find(|s| s.type_id == type_id)
            .and_then(|s| s.state_name.clone())
    }

    pub fn drain(&mut self) -> Vec<MonitorSlot> {
        std::mem::take(&mut self.slots)
    }
}
