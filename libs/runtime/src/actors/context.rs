//! Handler context for actors, and the type-erased actor instance

use super::machine::{
    default_event, Effects, HandlerContext, MachineCore, StateFilter, StateTable, Transition,
};
use super::mailbox::Dequeued;
use super::{ActorBehavior, StateMachine};
use crate::monitor::Monitor;
use crate::runtime::Runtime;
use std::any::Any;
use std::fmt::Debug;
use std::rc::Rc;
use types::{type_label, ActorId, Event, Result};

/// What an actor handler can do
///
/// Stack changes and raised events are recorded and applied once the
/// handler returns; sends, actor creation and nondeterministic choices take
/// effect immediately.
pub struct Context<M: StateMachine> {
    runtime: Runtime,
    id: ActorId,
    state: M::State,
    effects: Effects<M::State>,
}

impl<M: StateMachine> Context<M> {
    pub(crate) fn new(runtime: Runtime, id: ActorId, state: M::State) -> Self {
        Self {
            runtime,
            id,
            state,
            effects: Effects::default(),
        }
    }

    /// Id of the running actor
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// State whose handler is running
    pub fn current_state(&self) -> M::State {
        self.state
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Enqueue `payload` in the target's mailbox
    pub fn send<E: Any + Debug>(&self, target: ActorId, payload: E) {
        self.runtime.send_event(target, Event::new(payload));
    }

    pub fn send_event(&self, target: ActorId, event: Event) {
        self.runtime.send_event(target, event);
    }

    /// Handle `payload` next, before any queued event
    pub fn raise<E: Any + Debug>(&mut self, payload: E) {
        self.effects.raised.push(Event::new(payload));
    }

    pub fn raise_event(&mut self, event: Event) {
        self.effects.raised.push(event);
    }

    /// Replace the top state once the handler returns
    pub fn goto(&mut self, state: M::State) {
        self.effects.transitions.push(Transition::Goto(state));
    }

    pub fn push(&mut self, state: M::State) {
        self.effects.transitions.push(Transition::Push(state));
    }

    pub fn pop(&mut self) {
        self.effects.transitions.push(Transition::Pop);
    }

    /// Stop the actor; queued events are dropped
    pub fn halt(&mut self) {
        self.effects.transitions.push(Transition::Halt);
    }

    pub fn create_actor<N: StateMachine>(
        &self,
        machine: N,
        init: Option<Event>,
    ) -> Result<ActorId> {
        self.runtime.create_actor(machine, init)
    }

    pub fn random_boolean(&self) -> Result<bool> {
        self.runtime.random_boolean()
    }

    /// `true` with probability `1 / max_value`
    pub fn random_boolean_with(&self, max_value: u32) -> Result<bool> {
        self.runtime.random_boolean_with(max_value)
    }

    pub fn random_integer(&self, max_value: u32) -> Result<u32> {
        self.runtime.random_integer(max_value)
    }

    pub fn assert(&self, condition: bool, message: impl Into<String>) -> Result<()> {
        self.runtime.assert(condition, message)
    }

    /// Deliver `payload` synchronously to the monitor of type `N`
    pub fn monitor<N: Monitor, E: Any + Debug>(&self, payload: E) -> Result<()> {
        self.runtime.invoke_monitor::<N>(Event::new(payload))
    }
}

impl<M: StateMachine> HandlerContext<M::State> for Context<M> {
    fn into_effects(self) -> Effects<M::State> {
        self.effects
    }
}

/// An actor of type `M` with its machine core
pub(crate) struct ActorInstance<M: StateMachine> {
    id: ActorId,
    core: MachineCore<M::State, M, Context<M>>,
    init: Option<Event>,
    started: bool,
}

impl<M: StateMachine> ActorInstance<M> {
    pub fn new(
        id: ActorId,
        machine: M,
        table: Rc<StateTable<M::State, M, Context<M>>>,
        init: Option<Event>,
    ) -> Self {
        Self {
            id,
            core: MachineCore::new(machine, table, type_label::<M>()),
            init,
            started: false,
        }
    }
}

impl<M: StateMachine> ActorBehavior for ActorInstance<M> {
    fn step(&mut self, runtime: &Runtime) -> Result<()> {
        let id = self.id;
        let make = |state: M::State| Context::<M>::new(runtime.clone(), id, state);

        if !self.started {
            self.started = true;
            let init = self.init.take();
            return self.core.start(&make, init.as_ref());
        }

        let filter = self.core.filter();
        match runtime.dequeue(id, &filter) {
            Dequeued::Event(event) => {
                runtime.note_dispatch();
                self.core.handle(&make, event)
            }
            Dequeued::Default => {
                runtime.note_dispatch();
                self.core.handle(&make, default_event())
            }
            Dequeued::Empty => Ok(()),
        }
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn is_halted(&self) -> bool {
        self.core.is_halted()
    }

    fn filter(&self) -> StateFilter {
        self.core.filter()
    }

    fn stack_hash(&self) -> u64 {
        self.core.stack_hash()
    }

    fn hashed_state(&self) -> Option<u64> {
        self.core.machine().hashed_state()
    }

    fn state_name(&self) -> Option<String> {
        self.core.current_state().map(|s| format!("{:?}", s))
    }
}
