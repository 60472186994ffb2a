use std::{
    any::Any,
    mem,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::error;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Unbounded FIFO queue handing work from background network tasks to the
/// single consumer thread that owns the session state.
///
/// `post` is safe from any thread; `drain_and_run` must only be called from
/// the consumer thread. A task posted while a batch is executing lands in the
/// next batch, never the current one.
#[derive(Default)]
pub struct TaskQueue {
    pending: Mutex<Vec<Task>>,
}

impl TaskQueue {
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.lock().push(Box::new(task));
    }

    /// Swaps out the whole pending list under the lock, then executes the
    /// batch in posting order with the lock released. Returns the batch size.
    pub fn drain_and_run(&self) -> usize {
        let batch = mem::take(&mut *self.lock());
        let count = batch.len();
        for task in batch {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                error!(panic = panic_message(panic.as_ref()), "queued task panicked");
            }
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Task>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
