//! Immutable Event Envelope
//!
//! An [`Event`] carries a single payload value of any `'static + Debug` type.
//! The payload's `TypeId` is the event's [`EventKind`]: the closed tag that
//! state tables key their handlers by. Events are cheap to clone (reference
//! counted) and can never be mutated once created, so ownership "transfers"
//! to the receiving mailbox on send.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Reserved event: cooperatively terminates the receiving actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Halt;

/// Reserved event: synthesised when a state declares a handler for it and the
/// mailbox holds no eligible event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DefaultEvent;

/// Closed event-kind tag derived from the payload type
#[derive(Clone, Copy)]
pub struct EventKind {
    id: TypeId,
    name: &'static str,
}

impl EventKind {
    /// Kind of payload type `E`
    pub fn of<E: Any>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: short_type_name(std::any::type_name::<E>()),
        }
    }

    /// Short payload type name, for logs and reports
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// True for the reserved [`Halt`] kind
    pub fn is_halt(&self) -> bool {
        self.id == TypeId::of::<Halt>()
    }

    /// True for the reserved [`DefaultEvent`] kind
    pub fn is_default(&self) -> bool {
        self.id == TypeId::of::<DefaultEvent>()
    }
}

impl PartialEq for EventKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventKind {}

impl Hash for EventKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

type PayloadFormatter = fn(&dyn Any, &mut fmt::Formatter<'_>) -> fmt::Result;

/// Immutable tagged message exchanged between actors and published to monitors
#[derive(Clone)]
pub struct Event {
    kind: EventKind,
    payload: Rc<dyn Any>,
    fmt_payload: PayloadFormatter,
}

impl Event {
    /// Wrap a payload value
    pub fn new<E: Any + fmt::Debug>(payload: E) -> Self {
        Self {
            kind: EventKind::of::<E>(),
            payload: Rc::new(payload),
            fmt_payload: format_payload::<E>,
        }
    }

    /// The halt event
    pub fn halt() -> Self {
        Self::new(Halt)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Short payload type name
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Check the payload type
    pub fn is<E: Any>(&self) -> bool {
        self.kind.id == TypeId::of::<E>()
    }

    /// Borrow the payload as `E`
    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.fmt_payload)(self.payload.as_ref(), f)
    }
}

fn format_payload<E: Any + fmt::Debug>(
    payload: &dyn Any,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    match payload.downcast_ref::<E>() {
        Some(value) => value.fmt(f),
        None => f.write_str("<payload>"),
    }
}

/// Short name of any type, for logs and reports
pub fn type_label<T: ?Sized>() -> &'static str {
    short_type_name(std::any::type_name::<T>())
}

/// Strip module paths from a type name, keeping generic arguments intact
fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}
