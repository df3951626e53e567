//! Implementation of the thread pool itself.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{Arc, Condvar, Mutex},
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};
use once_cell::sync::Lazy;

use crate::{
    promise::Promise,
    result::{Output, TaskResult},
    task::{ClosureTask, QueuedTask, Task},
    worker::{self, Worker},
};

#[cfg(target_has_atomic = "64")]
type AtomicCounter = std::sync::atomic::AtomicU64;

#[cfg(not(target_has_atomic = "64"))]
type AtomicCounter = std::sync::atomic::AtomicU32;

/// Default capacity of the task queue.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default ceiling on the worker count in cached mode.
const DEFAULT_WORKER_LIMIT: usize = 10;

/// Default time a submission may block waiting for queue space.
const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default idle time after which a surplus cached-mode worker retires.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

static CORE_COUNT: Lazy<usize> = Lazy::new(|| num_cpus::get().max(1));

/// The capacity policy of a [`ThreadPool`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolMode {
    /// The worker count is fixed at whatever [`start`](ThreadPool::start)
    /// created and never changes afterwards.
    Fixed,

    /// The worker count is elastic: the pool eagerly spawns extra workers
    /// when submissions outpace the idle workers, up to the configured
    /// limit, and retires them again once they have sat idle long enough.
    /// The count never drops below the initial count set at start.
    Cached,
}

/// A builder for constructing a customized [`ThreadPool`].
///
/// All configuration happens here, before the pool exists; once built, a
/// pool's policy and thresholds cannot change.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use threadmill::{PoolMode, ThreadPool};
///
/// let pool = ThreadPool::builder()
///     .mode(PoolMode::Cached)
///     .queue_capacity(256)
///     .worker_limit(8)
///     .idle_timeout(Duration::from_secs(30))
///     .build();
/// pool.start_with(2);
/// ```
#[derive(Debug)]
pub struct Builder {
    mode: PoolMode,
    queue_capacity: usize,
    worker_limit: usize,
    idle_timeout: Duration,
    submit_timeout: Duration,
    thread_name: Option<String>,
    stack_size: Option<usize>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            mode: PoolMode::Fixed,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_limit: DEFAULT_WORKER_LIMIT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            thread_name: None,
            stack_size: None,
        }
    }
}

impl Builder {
    /// Set the capacity policy for the pool.
    ///
    /// The default is [`PoolMode::Fixed`].
    pub fn mode(mut self, mode: PoolMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the maximum number of tasks allowed to wait in the queue.
    ///
    /// When the queue is full, [`submit`](ThreadPool::submit) blocks for up
    /// to the submission timeout and then rejects the task. The default
    /// capacity is 1024.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        if capacity == 0 {
            panic!("task queue capacity must be non-zero");
        }

        self.queue_capacity = capacity;
        self
    }

    /// Set the ceiling on the worker count in [`PoolMode::Cached`] mode.
    ///
    /// Has no effect under [`PoolMode::Fixed`]. The default limit is 10.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is zero.
    pub fn worker_limit(mut self, limit: usize) -> Self {
        if limit == 0 {
            panic!("worker limit must be non-zero");
        }

        self.worker_limit = limit;
        self
    }

    /// Set how long a surplus cached-mode worker may sit idle before it
    /// retires itself.
    ///
    /// Only workers above the initial count retire. The default is 10
    /// seconds.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set how long a submission may block waiting for queue space before
    /// it is rejected.
    ///
    /// The default is 1 second.
    pub fn submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// Set a custom name prefix for threads spawned by this pool.
    ///
    /// Worker threads are named `<name>-<id>`.
    ///
    /// # Panics
    ///
    /// Panics if the name contains null bytes (`\0`).
    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        let name = name.into();

        if name.as_bytes().contains(&0) {
            panic!("thread pool name must not contain null bytes");
        }

        self.thread_name = Some(name);
        self
    }

    /// Set the size of the stack (in bytes) for threads in this pool.
    ///
    /// If not specified, the default size for new Rust threads is used.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Create a thread pool according to the configuration set with this
    /// builder.
    ///
    /// The pool is not running yet; call [`start`](ThreadPool::start) or
    /// [`start_with`](ThreadPool::start_with) before submitting work.
    pub fn build(self) -> ThreadPool {
        let shared = Shared {
            config: Config {
                mode: self.mode,
                queue_capacity: self.queue_capacity,
                worker_limit: self.worker_limit,
                idle_timeout: self.idle_timeout,
                submit_timeout: self.submit_timeout,
                thread_name: self.thread_name,
                stack_size: self.stack_size,
            },
            state: Mutex::new(PoolState {
                phase: Phase::Created,
                queue: VecDeque::new(),
                initial_workers: 0,
                current_workers: 0,
                idle_workers: 0,
                workers: HashMap::new(),
                next_worker_id: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            all_exited: Condvar::new(),
            completed_tasks: AtomicCounter::new(0),
            panicked_tasks: AtomicCounter::new(0),
        };

        ThreadPool {
            shared: Arc::new(shared),
        }
    }
}

/// A pool of long-lived worker threads consuming tasks from a shared,
/// capacity-limited queue.
///
/// Tasks are dequeued in FIFO submission order; completion order across
/// workers is unordered. Each submission yields a [`TaskResult`] the
/// submitter can block on for that task's value.
///
/// # Capacity policies
///
/// Under [`PoolMode::Fixed`] (the default) the worker count set at start
/// never changes. Under [`PoolMode::Cached`] the pool grows eagerly when a
/// submission finds more queued tasks than idle workers, up to the
/// configured limit, and surplus workers retire after sitting idle past the
/// idle timeout.
///
/// # Backpressure
///
/// The queue is bounded. When it is full, [`submit`](ThreadPool::submit)
/// blocks up to the submission timeout and then rejects the task with an
/// invalid handle. A rejected submission means "shed load or try later" —
/// retrying in a hot loop defeats the point.
///
/// # Shutdown
///
/// [`shutdown`](ThreadPool::shutdown) (also run when the pool is dropped)
/// stops intake, wakes every worker, and blocks until each has removed
/// itself from the pool's registry. Workers only exit once they observe an
/// empty queue, so everything enqueued while the pool was running is
/// executed first.
///
/// # Examples
///
/// ```
/// use threadmill::ThreadPool;
///
/// let pool = ThreadPool::new();
/// pool.start_with(2);
///
/// let promise = pool.execute(|| 2 + 2);
/// assert_eq!(promise.get(), Some(4));
/// ```
pub struct ThreadPool {
    shared: Arc<Shared>,
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPool {
    /// Create a new thread pool with the default configuration.
    ///
    /// If you'd like to customize the pool's behavior then use
    /// [`ThreadPool::builder`].
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Get a builder for creating a customized thread pool.
    #[inline]
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Start the pool with one worker per available CPU core.
    ///
    /// Under [`PoolMode::Cached`] the count is capped at the configured
    /// worker limit. See [`start_with`](ThreadPool::start_with).
    pub fn start(&self) {
        let workers = match self.shared.config.mode {
            PoolMode::Fixed => *CORE_COUNT,
            PoolMode::Cached => (*CORE_COUNT).min(self.shared.config.worker_limit),
        };

        self.start_with(workers);
    }

    /// Start the pool with `workers` initial workers.
    ///
    /// Under [`PoolMode::Cached`] this count is also the floor the pool
    /// shrinks back to when load subsides.
    ///
    /// A pool starts at most once; calling this on a pool that is already
    /// running (or was shut down) logs a warning and does nothing.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero under [`PoolMode::Fixed`] (such a pool
    /// could never run anything), or if `workers` exceeds the configured
    /// worker limit under [`PoolMode::Cached`].
    pub fn start_with(&self, workers: usize) {
        let config = &self.shared.config;

        if config.mode == PoolMode::Fixed && workers == 0 {
            panic!("a fixed pool must start with at least one worker");
        }

        if config.mode == PoolMode::Cached && workers > config.worker_limit {
            panic!("initial worker count cannot exceed the worker limit");
        }

        let mut state = self.shared.state.lock().unwrap();

        if state.phase != Phase::Created {
            warn!("thread pool already started, ignoring");
            return;
        }

        state.phase = Phase::Running;
        state.initial_workers = workers;

        for _ in 0..workers {
            self.spawn_worker(&mut state);
        }

        debug!("thread pool started with {} workers", workers);
    }

    /// Submit a task to be executed by the pool.
    ///
    /// If the queue is full, blocks up to the submission timeout (1 second
    /// by default) for space. If the queue is still full after that, the
    /// task is rejected: it is never enqueued and the returned handle is
    /// invalid.
    ///
    /// In [`PoolMode::Cached`] mode, a submission that finds more queued
    /// tasks than idle workers also spawns one additional worker, as long
    /// as the pool is below its worker limit.
    ///
    /// Tasks submitted before [`start`](ThreadPool::start) sit in the queue
    /// until the pool is started. Tasks submitted after
    /// [`shutdown`](ThreadPool::shutdown) are always rejected.
    pub fn submit(&self, task: impl Task + 'static) -> TaskResult {
        let config = &self.shared.config;
        let mut state = self.shared.state.lock().unwrap();
        let deadline = Instant::now() + config.submit_timeout;

        loop {
            if state.phase == Phase::Stopped {
                warn!("submission rejected, pool is shut down");
                return TaskResult::rejected();
            }

            if state.queue.len() < config.queue_capacity {
                break;
            }

            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining,
                None => {
                    warn!(
                        "task queue full for {:?}, rejecting submission",
                        config.submit_timeout
                    );
                    return TaskResult::rejected();
                }
            };

            let (guard, _) = self.shared.not_full.wait_timeout(state, remaining).unwrap();
            state = guard;
        }

        let output = Arc::new(Output::new());
        state.queue.push_back(QueuedTask::bind(Box::new(task), &output));
        self.shared.not_empty.notify_all();

        if config.mode == PoolMode::Cached
            && state.queue.len() > state.idle_workers
            && state.current_workers < config.worker_limit
        {
            debug!(
                "{} queued tasks against {} idle workers, growing pool",
                state.queue.len(),
                state.idle_workers
            );
            self.spawn_worker(&mut state);
        }

        TaskResult::new(output)
    }

    /// Submit a closure and get a typed [`Promise`] for its return value.
    ///
    /// This is a convenience layer over [`submit`](ThreadPool::submit) that
    /// packages the closure into a task and casts the result back for you.
    /// It follows the same queueing, backpressure and rejection rules.
    ///
    /// # Examples
    ///
    /// ```
    /// use threadmill::ThreadPool;
    ///
    /// let pool = ThreadPool::new();
    /// pool.start_with(2);
    ///
    /// let promise = pool.execute(|| (1..=100u64).sum::<u64>());
    /// assert_eq!(promise.get(), Some(5050));
    /// ```
    pub fn execute<T, F>(&self, closure: F) -> Promise<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        Promise::new(self.submit(ClosureTask::new(closure)))
    }

    /// Shut down the pool and block until every worker has exited.
    ///
    /// Stops intake immediately (later submissions are rejected), wakes all
    /// waiting workers, and waits for each to deregister itself. Workers
    /// drain the queue before exiting, so tasks enqueued while the pool was
    /// running still execute. Idempotent; also run when the pool is dropped.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock().unwrap();

        state.phase = Phase::Stopped;
        self.shared.not_empty.notify_all();

        while !state.workers.is_empty() {
            state = self.shared.all_exited.wait(state).unwrap();
        }

        // With no workers left, anything still queued (possible only if the
        // pool was never started) can no longer run. Dropping the entries
        // unblocks their result handles.
        state.queue.clear();

        // Wake blocked submitters so they observe the stopped pool.
        self.shared.not_full.notify_all();
    }

    /// Get the number of worker threads currently in the pool.
    pub fn threads(&self) -> usize {
        self.shared.state.lock().unwrap().current_workers
    }

    /// Get the number of tasks waiting in the queue, not yet started.
    ///
    /// Note that the number returned may become immediately outdated.
    pub fn queued_tasks(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
    }

    /// Get the number of tasks completed (successfully or otherwise) by
    /// this pool since it was created.
    #[allow(clippy::useless_conversion)]
    pub fn completed_tasks(&self) -> u64 {
        use std::sync::atomic::Ordering;

        self.shared.completed_tasks.load(Ordering::Relaxed).into()
    }

    /// Get the number of tasks that have panicked since the pool was
    /// created.
    #[allow(clippy::useless_conversion)]
    pub fn panicked_tasks(&self) -> u64 {
        use std::sync::atomic::Ordering;

        self.shared.panicked_tasks.load(Ordering::Relaxed).into()
    }

    /// Whether the pool has been started and not yet shut down.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().unwrap().is_running()
    }

    /// Spawn one worker into the pool. Caller holds the pool lock.
    fn spawn_worker(&self, state: &mut PoolState) {
        let id = state.next_worker_id;
        state.next_worker_id += 1;

        let worker = Worker::new(id);
        debug!("spawning worker {}", worker.id());

        let mut builder = thread::Builder::new();

        if let Some(name) = self.shared.config.thread_name.as_ref() {
            builder = builder.name(format!("{}-{}", name, id));
        }

        if let Some(size) = self.shared.config.stack_size {
            builder = builder.stack_size(size);
        }

        state.workers.insert(id, worker);
        state.current_workers += 1;
        state.idle_workers += 1;

        let shared = Arc::clone(&self.shared);
        builder.spawn(move || worker::run(shared, id)).unwrap();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads())
            .field("queued_tasks", &self.queued_tasks())
            .field("completed_tasks", &self.completed_tasks())
            .finish()
    }
}

/// Pool lifecycle. `Created` pools accept and hold submissions but run
/// nothing; `Stopped` is terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Phase {
    Created,
    Running,
    Stopped,
}

/// Immutable pool configuration, frozen at build time.
pub(crate) struct Config {
    pub(crate) mode: PoolMode,
    pub(crate) queue_capacity: usize,
    pub(crate) worker_limit: usize,
    pub(crate) idle_timeout: Duration,
    pub(crate) submit_timeout: Duration,
    pub(crate) thread_name: Option<String>,
    pub(crate) stack_size: Option<usize>,
}

/// Everything a worker and its pool mutate together. One mutex guards the
/// queue, the counters and the registry; growth, shrink and shutdown
/// decisions all happen under it, so the counts can never straddle an
/// inconsistent read.
pub(crate) struct PoolState {
    pub(crate) phase: Phase,
    pub(crate) queue: VecDeque<QueuedTask>,
    pub(crate) initial_workers: usize,
    pub(crate) current_workers: usize,
    pub(crate) idle_workers: usize,
    pub(crate) workers: HashMap<usize, Worker>,
    next_worker_id: usize,
}

impl PoolState {
    pub(crate) fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Remove a worker's registry entry and account for it. Workers call
    /// this for themselves, under the pool lock, as their last act.
    pub(crate) fn deregister(&mut self, id: usize) {
        if self.workers.remove(&id).is_some() {
            self.current_workers -= 1;
        }
    }
}

/// State shared by the pool handle and its worker threads.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) state: Mutex<PoolState>,
    pub(crate) not_full: Condvar,
    pub(crate) not_empty: Condvar,
    pub(crate) all_exited: Condvar,
    pub(crate) completed_tasks: AtomicCounter,
    pub(crate) panicked_tasks: AtomicCounter,
}
