//! Actor Registry
//!
//! Owns every live actor slot of one iteration: its mailbox, its behavior and
//! the cached view of its active configuration the scheduler needs between
//! steps (filter, stack hash, user hashed state). Also resolves names to ids
//! and remembers which ids have been retired by a halt.

use super::mailbox::{Dequeued, Mailbox};
use super::machine::StateFilter;
use super::ActorBehavior;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::Hasher;
use tracing::debug;
use types::{ActorId, Error, Event, OperationId, Result, StateHasher};

/// Why an event was not delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The target id was never handed out
    UnknownActor,
    /// The id exists (reserved by name) but no machine is bound to it
    UnboundActor,
    /// The target halted, or halted with the event still queued
    HaltedActor,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DropReason::UnknownActor => "unknown actor",
            DropReason::UnboundActor => "unbound actor",
            DropReason::HaltedActor => "halted actor",
        };
        f.write_str(text)
    }
}

/// Notification published for every dropped event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedEvent {
    pub target: ActorId,
    pub event: &'static str,
    pub reason: DropReason,
}

pub(crate) enum Delivery {
    Queued,
    Dropped(Event, DropReason),
}

pub(crate) struct ActorSlot {
    pub op: OperationId,
    pub type_name: &'static str,
    mailbox: Mailbox,
    behavior: Option<Box<dyn ActorBehavior>>,
    started: bool,
    filter: StateFilter,
    stack_hash: u64,
    pub hashed_state: Option<u64>,
    state_name: Option<String>,
}

impl ActorSlot {
    /// Whether stepping the actor would make progress
    pub fn is_enabled(&self) -> bool {
        !self.started || self.mailbox.has_work(&self.filter)
    }

    /// Position of the event loop: active states and queued event kinds
    pub fn marker(&self) -> u64 {
        let mut hasher = StateHasher::new();
        hasher
            .combine(self.stack_hash)
            .combine(self.mailbox.kinds_hash())
            .combine(u64::from(self.started))
            .finish()
    }

    fn refresh(&mut self, behavior: &dyn ActorBehavior) {
        self.started = behavior.is_started();
        self.filter = behavior.filter();
        self.stack_hash = behavior.stack_hash();
        self.hashed_state = behavior.hashed_state();
        self.state_name = behavior.state_name();
    }
}

#[derive(Default)]
pub(crate) struct ActorRegistry {
    next_id: u64,
    names: HashMap<String, ActorId>,
    slots: BTreeMap<ActorId, ActorSlot>,
    retired: HashSet<ActorId>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub fn allocate_id(&mut self) -> ActorId {
        let id = ActorId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Id bound to `name`, reserving a fresh one the first time
    pub fn id_for_name(&mut self, name: &str) -> ActorId {
        if let Some(id) = self.names.get(name) {
            return *id;
        }
        let id = self.allocate_id();
        self.names.insert(name.to_string(), id);
        debug!(actor = %id, name, "Actor id reserved");
        id
    }

    pub fn is_bound(&self, id: ActorId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn check_bindable(&self, id: ActorId) -> Result<()> {
        if id.value() == 0 || id.value() >= self.next_id {
            return Err(Error::configuration(
                format!("{} was not issued by this runtime", id),
                Some("actor_id"),
            ));
        }
        if self.slots.contains_key(&id) {
            return Err(Error::configuration(
                format!("{} is already bound to a running actor", id),
                Some("actor_id"),
            ));
        }
        if self.retired.contains(&id) {
            return Err(Error::configuration(
                format!("{} belonged to an actor that has halted", id),
                Some("actor_id"),
            ));
        }
        Ok(())
    }

    pub fn bind(
        &mut self,
        id: ActorId,
        op: OperationId,
        type_name: &'static str,
        behavior: Box<dyn ActorBehavior>,
    ) -> Result<()> {
        self.check_bindable(id)?;
        let mut slot = ActorSlot {
            op,
            type_name,
            mailbox: Mailbox::new(),
            behavior: None,
            started: false,
            filter: StateFilter::default(),
            stack_hash: 0,
            hashed_state: None,
            state_name: None,
        };
        slot.refresh(behavior.as_ref());
        slot.behavior = Some(behavior);
        self.slots.insert(id, slot);
        Ok(())
    }

    pub fn slot(&self, id: ActorId) -> Option<&ActorSlot> {
        self.slots.get(&id)
    }

    pub fn deliver(&mut self, target: ActorId, event: Event) -> Delivery {
        match self.slots.get_mut(&target) {
            Some(slot) => {
                slot.mailbox.enqueue(event);
                Delivery::Queued
            }
            None if self.retired.contains(&target) => {
                Delivery::Dropped(event, DropReason::HaltedActor)
            }
            None if target.value() > 0 && target.value() < self.next_id => {
                Delivery::Dropped(event, DropReason::UnboundActor)
            }
            None => Delivery::Dropped(event, DropReason::UnknownActor),
        }
    }

    pub fn dequeue(&mut self, id: ActorId, filter: &StateFilter) -> Dequeued {
        match self.slots.get_mut(&id) {
            Some(slot) => slot.mailbox.dequeue(filter),
            None => Dequeued::Empty,
        }
    }

    pub fn take_behavior(&mut self, id: ActorId) -> Option<Box<dyn ActorBehavior>> {
        self.slots.get_mut(&id).and_then(|slot| slot.behavior.take())
    }

    pub fn restore(&mut self, id: ActorId, behavior: Box<dyn ActorBehavior>) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.refresh(behavior.as_ref());
            slot.behavior = Some(behavior);
        }
    }

    /// Remove a halted actor, returning the events still queued for it
    pub fn retire(&mut self, id: ActorId) -> Vec<Event> {
        self.retired.insert(id);
        match self.slots.remove(&id) {
            Some(mut slot) => slot.mailbox.drain(),
            None => Vec::new(),
        }
    }

    pub fn is_halted(&self, id: ActorId) -> bool {
        self.retired.contains(&id)
    }

    /// `Type[State]` of a live actor
    pub fn describe(&self, id: ActorId) -> Option<String> {
        self.slots.get(&id).map(|slot| match &slot.state_name {
            Some(state) => format!("{}[{}]", slot.type_name, state),
            None => slot.type_name.to_string(),
        })
    }

    pub fn state_name(&self, id: ActorId) -> Option<String> {
        self.slots.get(&id).and_then(|slot| slot.state_name.clone())
    }

    pub fn queued(&self, id: ActorId) -> usize {
        self.slots.get(&id).map_or(0, |slot| slot.mailbox.len())
    }

    /// Take every slot out, for teardown
    pub fn drain(&mut self) -> Vec<ActorSlot> {
        let slots = std::mem::take(&mut self.slots);
        slots.into_values().collect()
    }
}
