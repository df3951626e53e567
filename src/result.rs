use std::{
    fmt,
    sync::{Arc, Mutex},
};

use crate::{semaphore::Semaphore, value::TaskValue};

/// The slot a worker publishes a task's value into, shared between the
/// submitter's [`TaskResult`] and the queued task.
///
/// Every task gets its own slot with its own lock, so contention on one
/// task's result never blocks unrelated tasks.
pub(crate) struct Output {
    slot: Mutex<Option<TaskValue>>,
    semaphore: Semaphore,
}

impl Output {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            semaphore: Semaphore::new(),
        }
    }

    /// Stores the value and signals the waiting consumer. Called exactly
    /// once, from the worker that executed the bound task.
    pub(crate) fn set(&self, value: TaskValue) {
        *self.slot.lock().unwrap() = Some(value);
        self.semaphore.release();
    }

    /// Marks the slot as never going to be filled, unblocking the consumer.
    pub(crate) fn abandon(&self) {
        self.semaphore.shut_down();
    }

    /// Blocks until a value is published (or the slot is abandoned), then
    /// takes it.
    pub(crate) fn take(&self) -> Option<TaskValue> {
        self.semaphore.acquire();
        self.slot.lock().unwrap().take()
    }
}

/// A one-shot handle to the result of a submitted task.
///
/// Returned by [`ThreadPool::submit`](crate::ThreadPool::submit). A handle is
/// *invalid* when the submission itself was rejected (the queue stayed full
/// for the whole submission timeout); an invalid handle returns `None` from
/// [`get`](TaskResult::get) without blocking.
///
/// The value is delivered at most once: the first successful `get` transfers
/// ownership to the caller and every later call returns `None`.
///
/// # Examples
///
/// ```
/// use threadmill::{Task, TaskValue, ThreadPool};
///
/// struct Add(i32, i32);
///
/// impl Task for Add {
///     fn run(self: Box<Self>) -> TaskValue {
///         TaskValue::new(self.0 + self.1)
///     }
/// }
///
/// let pool = ThreadPool::new();
/// pool.start_with(1);
///
/// let mut result = pool.submit(Add(2, 2));
/// assert!(result.is_valid());
///
/// let value = result.get().unwrap();
/// assert_eq!(value.cast::<i32>().unwrap(), 4);
///
/// // The value was already consumed.
/// assert!(result.get().is_none());
/// ```
pub struct TaskResult {
    output: Option<Arc<Output>>,
    valid: bool,
}

impl TaskResult {
    pub(crate) fn new(output: Arc<Output>) -> Self {
        Self {
            output: Some(output),
            valid: true,
        }
    }

    pub(crate) fn rejected() -> Self {
        Self {
            output: None,
            valid: false,
        }
    }

    /// Whether the submission this handle belongs to was accepted.
    ///
    /// Stays `true` for an accepted submission even after the value has
    /// been consumed.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Blocks the calling thread until the task's value is available, then
    /// returns it.
    ///
    /// Returns `None` immediately if the handle is invalid or the value was
    /// already consumed by an earlier call. Also returns `None` if the pool
    /// was torn down before the task could ever be dequeued.
    pub fn get(&mut self) -> Option<TaskValue> {
        let output = self.output.take()?;
        output.take()
    }
}

impl fmt::Debug for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskResult")
            .field("valid", &self.valid)
            .finish()
    }
}
