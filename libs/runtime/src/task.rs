//! Controlled Tasks
//!
//! A task is a future owned by the runtime and polled only when the
//! scheduler picks its operation. Every `Pending` returned by a controlled
//! primitive is a scheduling point; the primitive records why the task is
//! suspended (lock, wait set, join) so the scheduler knows when it becomes
//! enabled again. Wakers are never used.

use crate::runtime::Runtime;
use crate::scheduler::OperationStatus;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use types::{Error, OperationId, Result};

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = Result<()>>>>;

/// Awaitable result of a spawned task
pub struct TaskHandle<T> {
    id: OperationId,
    result: Rc<RefCell<Option<T>>>,
    runtime: Runtime,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn is_completed(&self) -> bool {
        self.runtime.is_operation_completed(self.id)
    }

    fn take_result(&self) -> Result<T> {
        self.result.borrow_mut().take().ok_or_else(|| {
            Error::configuration(format!("result of task {} was already taken", self.id), None)
        })
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.is_completed() {
            Poll::Ready(self.take_result())
        } else {
            self.runtime.block_current(OperationStatus::Joining {
                targets: vec![self.id],
                all: true,
            });
            Poll::Pending
        }
    }
}

impl Runtime {
    /// Spawn a controlled task
    pub fn spawn<T, F>(&self, future: F) -> TaskHandle<T>
    where
        T: 'static,
        F: Future<Output = Result<T>> + 'static,
    {
        self.spawn_named("task", future)
    }

    /// Spawn a controlled task whose name shows up in logs and deadlock reports
    pub fn spawn_named<T, F>(&self, name: &str, future: F) -> TaskHandle<T>
    where
        T: 'static,
        F: Future<Output = Result<T>> + 'static,
    {
        let result = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&result);
        let task: TaskFuture = Box::pin(async move {
            let value = future.await?;
            *slot.borrow_mut() = Some(value);
            Ok::<(), Error>(())
        });
        let id = self.register_task(name, task);
        TaskHandle {
            id,
            result,
            runtime: self.clone(),
        }
    }

    /// Scheduling point with no other effect
    pub fn explore_context_switch(&self) -> ContextSwitch {
        ContextSwitch { yielded: false }
    }
}

/// Future returned by [`Runtime::explore_context_switch`]
pub struct ContextSwitch {
    yielded: bool,
}

impl Future for ContextSwitch {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            Poll::Pending
        }
    }
}

/// Wait for every task, collecting results in handle order
pub fn when_all<T>(handles: Vec<TaskHandle<T>>) -> WhenAll<T> {
    WhenAll { handles }
}

pub struct WhenAll<T> {
    handles: Vec<TaskHandle<T>>,
}

impl<T> Future for WhenAll<T> {
    type Output = Result<Vec<T>>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let pending: Vec<OperationId> = self
            .handles
            .iter()
            .filter(|h| !h.is_completed())
            .map(|h| h.id)
            .collect();
        match self.handles.first() {
            Some(first) if !pending.is_empty() => {
                first.runtime.block_current(OperationStatus::Joining {
                    targets: pending,
                    all: true,
                });
                Poll::Pending
            }
            _ => Poll::Ready(self.handles.iter().map(TaskHandle::take_result).collect()),
        }
    }
}

/// Wait for the first task to complete; resolves to the lowest completed
/// index
pub fn when_any<T>(handles: &[TaskHandle<T>]) -> WhenAny<'_, T> {
    WhenAny { handles }
}

pub struct WhenAny<'a, T> {
    handles: &'a [TaskHandle<T>],
}

impl<T> Future for WhenAny<'_, T> {
    type Output = Result<usize>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(index) = self.handles.iter().position(TaskHandle::is_completed) {
            return Poll::Ready(Ok(index));
        }
        match self.handles.first() {
            Some(first) => {
                first.runtime.block_current(OperationStatus::Joining {
                    targets: self.handles.iter().map(|h| h.id).collect(),
                    all: false,
                });
                Poll::Pending
            }
            None => Poll::Ready(Err(Error::configuration(
                "when_any needs at least one task",
                None,
            ))),
        }
    }
}
