//! Controlled Lock with Monitor-style Wait/Pulse
//!
//! [`ControlledLock`] protects a value and is acquired only from controlled
//! tasks. Acquiring, waiting and re-acquiring after a pulse are scheduling
//! points; releasing is not.
//!
//! Reacquisition is competitive: releasing a lock leaves it free and every
//! task blocked on it becomes enabled, so the strategy decides who gets it
//! next (a task that just released may take it straight back). `wait`
//! releases the lock and parks the task in the lock's FIFO wait set; only a
//! pulse moves it back to competing for the lock. A pulse with nobody
//! waiting is lost.
//!
//! ```rust,ignore
//! let buffer = ControlledLock::new(&rt, VecDeque::new());
//! let mut guard = buffer.acquire().await?;
//! while guard.is_empty() {
//!     guard = guard.wait().await?;
//! }
//! let item = guard.pop_front();
//! guard.pulse()?;
//! ```

use crate::runtime::Runtime;
use std::cell::{RefCell, RefMut};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use tracing::trace;
use types::{Error, LockId, Result};

/// Which waiters [`LockGuard::signal`] wakes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WakeMode {
    /// The longest waiter
    #[default]
    One,
    /// Every waiter
    All,
}

struct LockCell<T> {
    id: LockId,
    mode: WakeMode,
    runtime: Runtime,
    value: RefCell<T>,
}

/// Mutual-exclusion lock visible to the scheduler
pub struct ControlledLock<T> {
    inner: Rc<LockCell<T>>,
}

impl<T> Clone for ControlledLock<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> ControlledLock<T> {
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self::with_mode(runtime, value, WakeMode::One)
    }

    pub fn with_mode(runtime: &Runtime, value: T, mode: WakeMode) -> Self {
        let id = runtime.create_lock();
        trace!(lock = %id, ?mode, "Lock created");
        Self {
            inner: Rc::new(LockCell {
                id,
                mode,
                runtime: runtime.clone(),
                value: RefCell::new(value),
            }),
        }
    }

    pub fn id(&self) -> LockId {
        self.inner.id
    }

    pub fn is_held(&self) -> bool {
        self.inner.runtime.lock_owner(self.inner.id).is_some()
    }

    /// Acquire the lock; blocks the task while another task holds it
    pub fn acquire(&self) -> Acquire<'_, T> {
        Acquire { lock: self }
    }
}

/// Future returned by [`ControlledLock::acquire`]
pub struct Acquire<'a, T> {
    lock: &'a ControlledLock<T>,
}

impl<'a, T> Future for Acquire<'a, T> {
    type Output = Result<LockGuard<'a, T>>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let lock = self.lock;
        match lock.inner.runtime.acquire_lock(lock.inner.id) {
            Ok(true) => Poll::Ready(LockGuard::new(lock)),
            Ok(false) => Poll::Pending,
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

/// Releases the lock when dropped, unless disarmed by `wait`
struct Release<'a> {
    runtime: &'a Runtime,
    id: LockId,
    armed: bool,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.runtime.release_lock(self.id);
        }
    }
}

/// Exclusive access to the protected value; the lock is released on drop
pub struct LockGuard<'a, T> {
    // field order matters: the value borrow ends before the lock is released
    value: RefMut<'a, T>,
    release: Release<'a>,
    lock: &'a ControlledLock<T>,
}

impl<'a, T> LockGuard<'a, T> {
    fn new(lock: &'a ControlledLock<T>) -> Result<Self> {
        let release = Release {
            runtime: &lock.inner.runtime,
            id: lock.inner.id,
            armed: true,
        };
        let value = lock.inner.value.try_borrow_mut().map_err(|_| {
            Error::configuration(
                format!("value of {} is still borrowed by a previous owner", lock.inner.id),
                Some("lock"),
            )
        })?;
        Ok(Self { value, release, lock })
    }

    /// Release the lock and wait for a pulse, then reacquire it
    pub fn wait(self) -> Wait<'a, T> {
        Wait {
            lock: self.lock,
            guard: Some(self),
        }
    }

    /// Move the longest waiter back to competing for the lock
    pub fn pulse(&self) -> Result<()> {
        self.lock.inner.runtime.pulse_lock(self.lock.inner.id, false)?;
        Ok(())
    }

    /// Move every waiter back to competing for the lock
    pub fn pulse_all(&self) -> Result<()> {
        self.lock.inner.runtime.pulse_lock(self.lock.inner.id, true)?;
        Ok(())
    }

    /// Pulse according to the lock's [`WakeMode`]
    pub fn signal(&self) -> Result<()> {
        match self.lock.inner.mode {
            WakeMode::One => self.pulse(),
            WakeMode::All => self.pulse_all(),
        }
    }
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// Future returned by [`LockGuard::wait`]
pub struct Wait<'a, T> {
    lock: &'a ControlledLock<T>,
    guard: Option<LockGuard<'a, T>>,
}

impl<'a, T> Future for Wait<'a, T> {
    type Output = Result<LockGuard<'a, T>>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let lock = self.lock;
        let runtime = &lock.inner.runtime;

        if let Some(guard) = self.guard.take() {
            let LockGuard {
                value, mut release, ..
            } = guard;
            drop(value);
            release.armed = false;
            drop(release);
            return match runtime.wait_on_lock(lock.inner.id) {
                Ok(()) => Poll::Pending,
                Err(err) => Poll::Ready(Err(err)),
            };
        }

        match runtime.acquire_lock(lock.inner.id) {
            Ok(true) => Poll::Ready(LockGuard::new(lock)),
            Ok(false) => Poll::Pending,
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}
