//! Actor Mailbox
//!
//! FIFO queue of pending events. Dequeueing honours the active state's
//! filter: deferred events stay where they are, ignored events are removed
//! and discarded as the scan passes them.

use super::machine::StateFilter;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use tracing::trace;
use types::{Event, StateHasher};

/// Result of a dequeue attempt
#[derive(Debug)]
pub(crate) enum Dequeued {
    /// The first eligible event
    Event(Event),
    /// No eligible event, but the active state handles the default event
    Default,
    /// Nothing to do
    Empty,
}

#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    queue: VecDeque<Event>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether a dequeue under `filter` would make progress
    pub fn has_work(&self, filter: &StateFilter) -> bool {
        filter.has_default || self.queue.iter().any(|e| !filter.is_deferred(e.kind()))
    }

    pub fn dequeue(&mut self, filter: &StateFilter) -> Dequeued {
        let mut index = 0;
        while index < self.queue.len() {
            let kind = self.queue[index].kind();
            if filter.is_deferred(kind) {
                index += 1;
                continue;
            }
            let Some(event) = self.queue.remove(index) else {
                break;
            };
            if filter.is_ignored(kind) {
                trace!(event = event.name(), "Ignored event discarded");
                continue;
            }
            return Dequeued::Event(event);
        }
        if filter.has_default {
            Dequeued::Default
        } else {
            Dequeued::Empty
        }
    }

    /// Hash of the queued event kinds, in order
    pub fn kinds_hash(&self) -> u64 {
        let mut hasher = StateHasher::new();
        for event in &self.queue {
            event.kind().hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Remove every queued event
    pub fn drain(&mut self) -> Vec<Event> {
        self.queue.drain(..).collect()
    }
}
