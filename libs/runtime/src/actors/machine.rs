//! State Tables and Dispatch
//!
//! A machine type declares its states once, in `configure`, as plain data: an
//! optional entry and exit action plus a map from [`EventKind`] to a binding
//! (do, goto, push, defer, ignore). The active configuration is an explicit
//! stack of state indices.
//!
//! Handler resolution for an event kind walks the stack from the top:
//! goto and push bindings only count on the top state, do/defer/ignore
//! bindings are inherited from the states below (the topmost one wins). If
//! nothing matches and more than one state is stacked, the top state is
//! popped and resolution is retried; with a single state left the event is
//! unhandled.
//!
//! [`MachineCore`] owns one machine instance with its stack and raised-event
//! queue and implements the run-to-completion algorithm for both actors and
//! monitors. Handlers never mutate the stack directly: transitions and raised
//! events are collected by the handler's context and applied in request
//! order once the handler returns.

use std::any::{type_name, Any};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;
use tracing::{debug, trace};
use types::{hash_of, DefaultEvent, Error, Event, EventKind, Result};

/// Bound satisfied by state enums
pub trait StateId: Copy + Eq + Hash + Debug + 'static {}

impl<T: Copy + Eq + Hash + Debug + 'static> StateId for T {}

pub(crate) type ActionFn<M, C> = Rc<dyn Fn(&mut M, &mut C, &Event) -> Result<()>>;
pub(crate) type EntryFn<M, C> = Rc<dyn Fn(&mut M, &mut C, Option<&Event>) -> Result<()>>;
pub(crate) type ExitFn<M, C> = Rc<dyn Fn(&mut M, &mut C) -> Result<()>>;

/// Liveness tag of a monitor state; untagged states are cold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Temperature {
    /// An obligation is pending
    Hot,
    /// Every obligation is discharged
    #[default]
    Cold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MachineKind {
    Actor,
    Monitor,
}

pub(crate) enum Binding<S, M, C> {
    Do(ActionFn<M, C>),
    Goto(S, Option<ActionFn<M, C>>),
    Push(S),
    Defer,
    Ignore,
}

pub(crate) struct StateDecl<S, M, C> {
    id: S,
    entry: Option<EntryFn<M, C>>,
    exit: Option<ExitFn<M, C>>,
    bindings: HashMap<EventKind, Binding<S, M, C>>,
    temperature: Option<Temperature>,
}

impl<S, M, C> StateDecl<S, M, C> {
    fn new(id: S) -> Self {
        Self {
            id,
            entry: None,
            exit: None,
            bindings: HashMap::new(),
            temperature: None,
        }
    }
}

/// Outcome of handler resolution for one event kind
pub(crate) enum Resolved<M, C> {
    Do(ActionFn<M, C>),
    Goto(usize, Option<ActionFn<M, C>>),
    Push(usize),
    Defer,
    Ignore,
}

/// Which queued event kinds the active configuration may dequeue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateFilter {
    pub deferred: HashSet<EventKind>,
    pub ignored: HashSet<EventKind>,
    pub has_default: bool,
}

impl StateFilter {
    pub fn is_deferred(&self, kind: EventKind) -> bool {
        self.deferred.contains(&kind)
    }

    pub fn is_ignored(&self, kind: EventKind) -> bool {
        self.ignored.contains(&kind)
    }
}

/// Declarative state table of one machine type
///
/// `S` is the machine's state enum, `M` the machine itself and `C` the
/// context its handlers receive.
pub struct StateTable<S, M, C> {
    states: Vec<StateDecl<S, M, C>>,
    index: HashMap<S, usize>,
    start: Option<S>,
    problems: Vec<String>,
}

impl<S: StateId, M: 'static, C: 'static> Default for StateTable<S, M, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: StateId, M: 'static, C: 'static> StateTable<S, M, C> {
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            index: HashMap::new(),
            start: None,
            problems: Vec::new(),
        }
    }

    fn declare(&mut self, state: S) -> &mut StateDecl<S, M, C> {
        let index = match self.index.get(&state) {
            Some(&index) => index,
            None => {
                self.states.push(StateDecl::new(state));
                let index = self.states.len() - 1;
                self.index.insert(state, index);
                index
            }
        };
        &mut self.states[index]
    }

    fn bind(&mut self, state: S, kind: EventKind, binding: Binding<S, M, C>) -> &mut Self {
        let duplicate = self.declare(state).bindings.insert(kind, binding).is_some();
        if duplicate {
            self.problems
                .push(format!("event {} is bound twice in state {:?}", kind, state));
        }
        self
    }

    /// Initial state, entered when the machine starts
    pub fn start(&mut self, state: S) -> &mut Self {
        if let Some(previous) = self.start {
            if previous != state {
                self.problems.push(format!(
                    "multiple start states: {:?} and {:?}",
                    previous, state
                ));
            }
        }
        self.start = Some(state);
        self.declare(state);
        self
    }

    /// Declare a state without handlers
    pub fn state(&mut self, state: S) -> &mut Self {
        self.declare(state);
        self
    }

    /// Entry action; receives the event that caused the transition, if any
    pub fn on_entry<F>(&mut self, state: S, action: F) -> &mut Self
    where
        F: Fn(&mut M, &mut C, Option<&Event>) -> Result<()> + 'static,
    {
        let entry: EntryFn<M, C> = Rc::new(action);
        if self.declare(state).entry.replace(entry).is_some() {
            self.problems
                .push(format!("state {:?} has two entry actions", state));
        }
        self
    }

    /// Entry action expecting an `E` payload on the entering event
    pub fn on_entry_with<E, F>(&mut self, state: S, action: F) -> &mut Self
    where
        E: Any,
        F: Fn(&mut M, &mut C, &E) -> Result<()> + 'static,
    {
        self.on_entry(state, move |m: &mut M, c: &mut C, event: Option<&Event>| {
            match event.and_then(|e| e.downcast_ref::<E>()) {
                Some(payload) => action(m, c, payload),
                None => Err(Error::configuration(
                    format!(
                        "entry of state {:?} expects a {} payload, got {:?}",
                        state,
                        type_name::<E>(),
                        event.map(|e| e.name())
                    ),
                    None,
                )),
            }
        })
    }

    /// Exit action
    pub fn on_exit<F>(&mut self, state: S, action: F) -> &mut Self
    where
        F: Fn(&mut M, &mut C) -> Result<()> + 'static,
    {
        let exit: ExitFn<M, C> = Rc::new(action);
        if self.declare(state).exit.replace(exit).is_some() {
            self.problems
                .push(format!("state {:?} has two exit actions", state));
        }
        self
    }

    /// Handle `E` without changing state
    pub fn on_do<E, F>(&mut self, state: S, action: F) -> &mut Self
    where
        E: Any,
        F: Fn(&mut M, &mut C, &E) -> Result<()> + 'static,
    {
        self.bind(state, EventKind::of::<E>(), Binding::Do(typed_action(action)))
    }

    /// Replace the top state with `target` on `E`
    pub fn on_goto<E: Any>(&mut self, state: S, target: S) -> &mut Self {
        self.bind(state, EventKind::of::<E>(), Binding::Goto(target, None))
    }

    /// Replace the top state with `target` on `E`, then run `action`
    pub fn on_goto_with<E, F>(&mut self, state: S, target: S, action: F) -> &mut Self
    where
        E: Any,
        F: Fn(&mut M, &mut C, &E) -> Result<()> + 'static,
    {
        self.bind(
            state,
            EventKind::of::<E>(),
            Binding::Goto(target, Some(typed_action(action))),
        )
    }

    /// Push `target` on top of the current state on `E`
    pub fn on_push<E: Any>(&mut self, state: S, target: S) -> &mut Self {
        self.bind(state, EventKind::of::<E>(), Binding::Push(target))
    }

    /// Keep `E` queued while this state is active
    pub fn defer<E: Any>(&mut self, state: S) -> &mut Self {
        self.bind(state, EventKind::of::<E>(), Binding::Defer)
    }

    /// Drop `E` without running any handler while this state is active
    pub fn ignore<E: Any>(&mut self, state: S) -> &mut Self {
        self.bind(state, EventKind::of::<E>(), Binding::Ignore)
    }

    /// Tag a monitor state as hot
    pub fn hot(&mut self, state: S) -> &mut Self {
        self.tag(state, Temperature::Hot)
    }

    /// Tag a monitor state as cold
    pub fn cold(&mut self, state: S) -> &mut Self {
        self.tag(state, Temperature::Cold)
    }

    fn tag(&mut self, state: S, temperature: Temperature) -> &mut Self {
        let previous = self.declare(state).temperature.replace(temperature);
        if matches!(previous, Some(p) if p != temperature) {
            self.problems
                .push(format!("state {:?} is tagged both hot and cold", state));
        }
        self
    }

    /// Check the table is well formed for the given machine kind
    pub(crate) fn validate(&self, machine: &str, kind: MachineKind) -> Result<()> {
        let fail = |message: String| Err(Error::configuration(message, Some(machine)));

        if let Some(problem) = self.problems.first() {
            return fail(format!("{}: {}", machine, problem));
        }
        if self.start.is_none() {
            return fail(format!("{} declares no start state", machine));
        }
        for decl in &self.states {
            if kind == MachineKind::Actor && decl.temperature.is_some() {
                return fail(format!(
                    "{}: actor state {:?} cannot be hot or cold",
                    machine, decl.id
                ));
            }
            for (event, binding) in &decl.bindings {
                if event.is_halt() {
                    return fail(format!(
                        "{}: state {:?} binds the reserved halt event",
                        machine, decl.id
                    ));
                }
                match binding {
                    Binding::Goto(target, _) | Binding::Push(target)
                        if !self.index.contains_key(target) =>
                    {
                        return fail(format!(
                            "{}: state {:?} transitions to undeclared state {:?}",
                            machine, decl.id, target
                        ));
                    }
                    Binding::Defer if kind == MachineKind::Monitor => {
                        return fail(format!(
                            "{}: monitor state {:?} cannot defer {}",
                            machine, decl.id, event
                        ));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    pub(crate) fn start_index(&self) -> Option<usize> {
        self.start.and_then(|s| self.index.get(&s).copied())
    }

    pub(crate) fn index_of(&self, state: S) -> Option<usize> {
        self.index.get(&state).copied()
    }

    pub(crate) fn state_id(&self, index: usize) -> Option<S> {
        self.states.get(index).map(|decl| decl.id)
    }

    pub(crate) fn temperature(&self, index: usize) -> Temperature {
        self.states
            .get(index)
            .and_then(|decl| decl.temperature)
            .unwrap_or_default()
    }

    /// Whether any state binds the event kind
    pub(crate) fn declares(&self, kind: EventKind) -> bool {
        self.states
            .iter()
            .any(|decl| decl.bindings.contains_key(&kind))
    }

    pub(crate) fn resolve(
        &self,
        stack: &[usize],
        kind: EventKind,
        raised: bool,
    ) -> Option<Resolved<M, C>> {
        for (depth, &index) in stack.iter().rev().enumerate() {
            let top = depth == 0;
            let Some(binding) = self.states.get(index).and_then(|d| d.bindings.get(&kind)) else {
                continue;
            };
            match binding {
                Binding::Do(action) => return Some(Resolved::Do(action.clone())),
                Binding::Goto(target, action) if top => {
                    if let Some(target) = self.index_of(*target) {
                        return Some(Resolved::Goto(target, action.clone()));
                    }
                }
                Binding::Push(target) if top => {
                    if let Some(target) = self.index_of(*target) {
                        return Some(Resolved::Push(target));
                    }
                }
                // raised events are never deferred or ignored
                Binding::Defer if !raised => return Some(Resolved::Defer),
                Binding::Ignore if !raised => return Some(Resolved::Ignore),
                _ => {}
            }
        }
        None
    }

    pub(crate) fn filter(&self, stack: &[usize]) -> StateFilter {
        let mut filter = StateFilter::default();
        let kinds: HashSet<EventKind> = stack
            .iter()
            .filter_map(|&i| self.states.get(i))
            .flat_map(|decl| decl.bindings.keys().copied())
            .collect();
        for kind in kinds {
            match self.resolve(stack, kind, false) {
                Some(Resolved::Defer) => {
                    filter.deferred.insert(kind);
                }
                Some(Resolved::Ignore) => {
                    filter.ignored.insert(kind);
                }
                Some(_) if kind.is_default() => filter.has_default = true,
                _ => {}
            }
        }
        filter
    }

    fn entry(&self, index: usize) -> Option<EntryFn<M, C>> {
        self.states.get(index).and_then(|decl| decl.entry.clone())
    }

    fn exit(&self, index: usize) -> Option<ExitFn<M, C>> {
        self.states.get(index).and_then(|decl| decl.exit.clone())
    }
}

fn typed_action<E, M, C, F>(action: F) -> ActionFn<M, C>
where
    E: Any,
    M: 'static,
    C: 'static,
    F: Fn(&mut M, &mut C, &E) -> Result<()> + 'static,
{
    Rc::new(move |m: &mut M, c: &mut C, event: &Event| -> Result<()> {
        match event.downcast_ref::<E>() {
            Some(payload) => action(m, c, payload),
            None => Err(Error::configuration(
                format!(
                    "handler for {} received a {} event",
                    type_name::<E>(),
                    event.name()
                ),
                None,
            )),
        }
    })
}

/// Stack change requested by a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition<S> {
    Goto(S),
    Push(S),
    Pop,
    Halt,
}

/// Transitions and raised events collected while a handler runs
#[derive(Debug)]
pub(crate) struct Effects<S> {
    pub transitions: Vec<Transition<S>>,
    pub raised: Vec<Event>,
}

impl<S> Default for Effects<S> {
    fn default() -> Self {
        Self {
            transitions: Vec::new(),
            raised: Vec::new(),
        }
    }
}

/// Handler context that hands its collected effects back to the core
pub(crate) trait HandlerContext<S>: Sized {
    fn into_effects(self) -> Effects<S>;
}

/// One machine instance with its state stack
pub(crate) struct MachineCore<S, M, C> {
    machine: M,
    table: Rc<StateTable<S, M, C>>,
    stack: Vec<usize>,
    raised: VecDeque<Event>,
    halted: bool,
    name: &'static str,
}

impl<S, M, C> MachineCore<S, M, C>
where
    S: StateId,
    M: 'static,
    C: HandlerContext<S> + 'static,
{
    pub fn new(machine: M, table: Rc<StateTable<S, M, C>>, name: &'static str) -> Self {
        Self {
            machine,
            table,
            stack: Vec::new(),
            raised: VecDeque::new(),
            halted: false,
            name,
        }
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn current_state(&self) -> Option<S> {
        self.stack.last().and_then(|&i| self.table.state_id(i))
    }

    /// Active states, bottom first
    pub fn state_stack(&self) -> Vec<S> {
        self.stack
            .iter()
            .filter_map(|&i| self.table.state_id(i))
            .collect()
    }

    pub fn stack_hash(&self) -> u64 {
        hash_of(&self.stack)
    }

    pub fn filter(&self) -> StateFilter {
        self.table.filter(&self.stack)
    }

    pub fn temperature(&self) -> Temperature {
        self.stack
            .last()
            .map(|&i| self.table.temperature(i))
            .unwrap_or_default()
    }

    pub fn declares(&self, kind: EventKind) -> bool {
        self.table.declares(kind)
    }

    /// Enter the start state
    pub fn start(&mut self, make: &dyn Fn(S) -> C, init: Option<&Event>) -> Result<()> {
        let start = self.table.start_index().ok_or_else(|| {
            Error::configuration(format!("{} declares no start state", self.name), Some(self.name))
        })?;
        self.stack.clear();
        self.stack.push(start);
        debug!(machine = self.name, state = ?self.current_state(), "Entering start state");
        self.enter(make, start, init)?;
        self.drain_raised(make)
    }

    /// Dispatch one event to completion, including any events it raises
    pub fn handle(&mut self, make: &dyn Fn(S) -> C, event: Event) -> Result<()> {
        self.dispatch(make, event, false)?;
        self.drain_raised(make)
    }

    fn drain_raised(&mut self, make: &dyn Fn(S) -> C) -> Result<()> {
        while !self.halted {
            match self.raised.pop_front() {
                Some(event) => self.dispatch(make, event, true)?,
                None => break,
            }
        }
        if self.halted {
            self.raised.clear();
        }
        Ok(())
    }

    fn dispatch(&mut self, make: &dyn Fn(S) -> C, event: Event, raised: bool) -> Result<()> {
        let kind = event.kind();
        if kind.is_halt() {
            debug!(machine = self.name, state = ?self.current_state(), "Halt received");
            self.halted = true;
            return Ok(());
        }

        loop {
            trace!(
                machine = self.name,
                state = ?self.current_state(),
                event = event.name(),
                raised,
                "Dispatching event"
            );
            match self.table.resolve(&self.stack, kind, raised) {
                Some(Resolved::Do(action)) => {
                    return self.invoke(make, |m, c| action(m, c, &event));
                }
                Some(Resolved::Goto(target, action)) => {
                    self.goto_index(make, target, Some(&event))?;
                    if let Some(action) = action {
                        if !self.halted {
                            self.invoke(make, |m, c| action(m, c, &event))?;
                        }
                    }
                    return Ok(());
                }
                Some(Resolved::Push(target)) => {
                    return self.push_index(make, target, Some(&event));
                }
                Some(Resolved::Defer) | Some(Resolved::Ignore) => return Ok(()),
                None if self.stack.len() > 1 => {
                    debug!(
                        machine = self.name,
                        state = ?self.current_state(),
                        event = event.name(),
                        "Popping state to find a handler"
                    );
                    self.pop_state(make)?;
                }
                None => {
                    return Err(Error::configuration(
                        format!(
                            "{} cannot handle event {} in state {:?}",
                            self.name,
                            event.name(),
                            self.current_state()
                        ),
                        Some(event.name()),
                    ));
                }
            }
        }
    }

    fn invoke<F>(&mut self, make: &dyn Fn(S) -> C, action: F) -> Result<()>
    where
        F: FnOnce(&mut M, &mut C) -> Result<()>,
    {
        let state = self.current_state().ok_or_else(|| {
            Error::configuration(format!("{} has no active state", self.name), Some(self.name))
        })?;
        let mut ctx = make(state);
        let outcome = action(&mut self.machine, &mut ctx);
        let effects = ctx.into_effects();
        outcome?;

        self.raised.extend(effects.raised);
        for transition in effects.transitions {
            if self.halted {
                break;
            }
            self.apply(make, transition)?;
        }
        Ok(())
    }

    fn apply(&mut self, make: &dyn Fn(S) -> C, transition: Transition<S>) -> Result<()> {
        match transition {
            Transition::Goto(state) => {
                let target = self.require(state)?;
                self.goto_index(make, target, None)
            }
            Transition::Push(state) => {
                let target = self.require(state)?;
                self.push_index(make, target, None)
            }
            Transition::Pop => self.pop_state(make),
            Transition::Halt => {
                debug!(machine = self.name, state = ?self.current_state(), "Halting");
                self.halted = true;
                Ok(())
            }
        }
    }

    fn require(&self, state: S) -> Result<usize> {
        self.table.index_of(state).ok_or_else(|| {
            Error::configuration(
                format!("{} has no state {:?}", self.name, state),
                Some(self.name),
            )
        })
    }

    fn enter(&mut self, make: &dyn Fn(S) -> C, index: usize, event: Option<&Event>) -> Result<()> {
        match self.table.entry(index) {
            Some(entry) => self.invoke(make, |m, c| entry(m, c, event)),
            None => Ok(()),
        }
    }

    fn exit_top(&mut self, make: &dyn Fn(S) -> C) -> Result<()> {
        let exit = self.stack.last().and_then(|&i| self.table.exit(i));
        match exit {
            Some(exit) => self.invoke(make, |m, c| exit(m, c)),
            None => Ok(()),
        }
    }

    fn goto_index(
        &mut self,
        make: &dyn Fn(S) -> C,
        target: usize,
        event: Option<&Event>,
    ) -> Result<()> {
        let from = self.current_state();
        self.exit_top(make)?;
        if let Some(top) = self.stack.last_mut() {
            *top = target;
        }
        debug!(machine = self.name, from = ?from, to = ?self.current_state(), "Goto");
        self.enter(make, target, event)
    }

    fn push_index(
        &mut self,
        make: &dyn Fn(S) -> C,
        target: usize,
        event: Option<&Event>,
    ) -> Result<()> {
        self.stack.push(target);
        debug!(machine = self.name, to = ?self.current_state(), depth = self.stack.len(), "Push");
        self.enter(make, target, event)
    }

    fn pop_state(&mut self, make: &dyn Fn(S) -> C) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(Error::configuration(
                format!(
                    "{} cannot pop its last state {:?}",
                    self.name,
                    self.current_state()
                ),
                Some(self.name),
            ));
        }
        self.exit_top(make)?;
        self.stack.pop();
        debug!(machine = self.name, to = ?self.current_state(), "Pop");
        Ok(())
    }
}

/// The `DefaultEvent` synthesised for an idle state with a default handler
pub(crate) fn default_event() -> Event {
    Event::new(DefaultEvent)
}
