//! Bounded buffer over a monitor lock
//!
//! Two readers and one writer share a ring guarded by a single
//! [`ControlledLock`] and its one wait set. Producers wait while the ring is
//! full, consumers while it is empty, and every successful put or take
//! signals the wait set.
//!
//! With one slot and [`WakeMode::One`] a take can wake the other reader
//! instead of the writer; both readers then wait on an empty ring while the
//! writer waits on a full one. With more slots than readers, or with
//! [`WakeMode::All`], the same program never deadlocks.

use runtime::{when_all, ControlledLock, Result, Runtime, WakeMode};
use std::collections::VecDeque;

/// Items the writer produces in one run
pub const ITEMS: u32 = 20;

const READERS: u32 = 2;

#[derive(Debug)]
struct Ring {
    slots: VecDeque<u32>,
    capacity: usize,
}

impl Ring {
    fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }
}

/// Shared ring handed to every reader and writer
#[derive(Clone)]
pub struct BoundedBuffer {
    ring: ControlledLock<Ring>,
}

impl BoundedBuffer {
    pub fn new(rt: &Runtime, capacity: usize, mode: WakeMode) -> Self {
        let ring = Ring {
            slots: VecDeque::with_capacity(capacity),
            capacity,
        };
        Self {
            ring: ControlledLock::with_mode(rt, ring, mode),
        }
    }

    pub async fn put(&self, item: u32) -> Result<()> {
        let mut guard = self.ring.acquire().await?;
        while guard.is_full() {
            guard = guard.wait().await?;
        }
        guard.slots.push_back(item);
        guard.signal()
    }

    pub async fn take(&self) -> Result<u32> {
        let mut guard = self.ring.acquire().await?;
        loop {
            if let Some(item) = guard.slots.pop_front() {
                guard.signal()?;
                return Ok(item);
            }
            guard = guard.wait().await?;
        }
    }
}

/// Readers first, then the writer, then a checker that every item arrived
/// exactly once
pub fn bounded_buffer(rt: &Runtime, capacity: usize, mode: WakeMode) -> Result<()> {
    let buffer = BoundedBuffer::new(rt, capacity, mode);

    let readers = (0..READERS)
        .map(|_| {
            let buffer = buffer.clone();
            rt.spawn_named("reader", async move {
                let mut taken = Vec::new();
                for _ in 0..ITEMS / READERS {
                    taken.push(buffer.take().await?);
                }
                Ok(taken)
            })
        })
        .collect::<Vec<_>>();

    let writer = rt.spawn_named("writer", async move {
        for item in 0..ITEMS {
            buffer.put(item).await?;
        }
        Ok(Vec::new())
    });

    let rt2 = rt.clone();
    rt.spawn_named("buffer-check", async move {
        let mut handles = readers;
        handles.push(writer);
        let mut taken: Vec<u32> = when_all(handles).await?.into_iter().flatten().collect();
        taken.sort_unstable();
        rt2.assert(
            taken == (0..ITEMS).collect::<Vec<_>>(),
            format!("buffer lost or duplicated items: {:?}", taken),
        )
    });
    Ok(())
}
