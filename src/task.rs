use std::{
    marker::PhantomData,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{atomic::Ordering, Arc, Weak},
};

use log::{error, trace};

use crate::{pool::Shared, result::Output, value::TaskValue};

/// A unit of work that can be submitted to a thread pool.
///
/// Implementors provide the computation in [`run`](Task::run); the pool takes
/// care of scheduling it onto a worker thread and routing the produced
/// [`TaskValue`] back to the submitter. `run` consumes the task, so a task
/// executes exactly once.
///
/// # Examples
///
/// ```
/// use threadmill::{Task, TaskValue, ThreadPool};
///
/// struct SumRange {
///     from: u64,
///     to: u64,
/// }
///
/// impl Task for SumRange {
///     fn run(self: Box<Self>) -> TaskValue {
///         TaskValue::new((self.from..=self.to).sum::<u64>())
///     }
/// }
///
/// let pool = ThreadPool::new();
/// pool.start_with(2);
///
/// let mut result = pool.submit(SumRange { from: 1, to: 100 });
/// let sum = result.get().unwrap().cast::<u64>().unwrap();
/// assert_eq!(sum, 5050);
/// ```
pub trait Task: Send {
    /// Performs the computation and yields its result.
    fn run(self: Box<Self>) -> TaskValue;
}

/// Adapter that turns an `FnOnce` closure into a [`Task`].
///
/// This is what backs [`ThreadPool::execute`](crate::ThreadPool::execute);
/// the phantom return type lets the matching [`Promise`](crate::Promise)
/// cast the result back without the caller ever seeing a `TaskValue`.
pub(crate) struct ClosureTask<F, T> {
    closure: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> ClosureTask<F, T> {
    pub(crate) fn new(closure: F) -> Self {
        Self {
            closure,
            _marker: PhantomData,
        }
    }
}

impl<F, T> Task for ClosureTask<F, T>
where
    F: FnOnce() -> T + Send,
    T: Send + 'static,
{
    fn run(self: Box<Self>) -> TaskValue {
        let this = *self;
        TaskValue::new((this.closure)())
    }
}

/// A task bound to its output slot, sitting in the pool's queue.
///
/// The binding happens exactly once, here, before the entry is enqueued. The
/// slot is held weakly: the submitter owns it through its
/// [`TaskResult`](crate::TaskResult), and if that handle is gone by the time
/// the task finishes, the value is simply discarded.
pub(crate) struct QueuedTask {
    task: Option<Box<dyn Task>>,
    output: Weak<Output>,
}

impl QueuedTask {
    pub(crate) fn bind(task: Box<dyn Task>, output: &Arc<Output>) -> Self {
        Self {
            task: Some(task),
            output: Arc::downgrade(output),
        }
    }

    /// Runs the task, accounts for it, and publishes its value into the
    /// bound output slot.
    ///
    /// A panic is contained here so it can never unwind through a worker
    /// thread; the output is abandoned instead so a blocked `get` observes
    /// `None` rather than hanging. The counters are bumped before the
    /// handoff so they are already current when the submitter unblocks.
    pub(crate) fn execute(mut self, shared: &Shared) {
        let task = match self.task.take() {
            Some(task) => task,
            None => return,
        };

        match catch_unwind(AssertUnwindSafe(move || task.run())) {
            Ok(value) => {
                shared.completed_tasks.fetch_add(1, Ordering::Relaxed);

                match self.output.upgrade() {
                    Some(output) => output.set(value),
                    None => trace!("result handle dropped, discarding task value"),
                }
            }
            Err(_) => {
                error!("task panicked during execution");
                shared.completed_tasks.fetch_add(1, Ordering::Relaxed);
                shared.panicked_tasks.fetch_add(1, Ordering::Relaxed);

                if let Some(output) = self.output.upgrade() {
                    output.abandon();
                }
            }
        }
    }
}

impl Drop for QueuedTask {
    fn drop(&mut self) {
        // Still holding the task means this entry was never executed (the
        // pool was torn down with the entry still queued). Abandoning the
        // slot unblocks a submitter waiting on it.
        if self.task.is_some() {
            if let Some(output) = self.output.upgrade() {
                output.abandon();
            }
        }
    }
}
