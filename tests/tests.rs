use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::bounded;
use threadmill::{PoolMode, Task, TaskValue, ThreadPool};

struct SumRange {
    from: u64,
    to: u64,
}

impl Task for SumRange {
    fn run(self: Box<Self>) -> TaskValue {
        TaskValue::new((self.from..=self.to).sum::<u64>())
    }
}

fn fixed(workers: usize) -> ThreadPool {
    let pool = ThreadPool::new();
    pool.start_with(workers);
    pool
}

#[test]
#[should_panic(expected = "thread pool name must not contain null bytes")]
fn name_with_null_bytes_panics() {
    ThreadPool::builder().name("uh\0oh");
}

#[test]
#[should_panic(expected = "task queue capacity must be non-zero")]
fn zero_queue_capacity_panics() {
    ThreadPool::builder().queue_capacity(0);
}

#[test]
#[should_panic(expected = "worker limit must be non-zero")]
fn zero_worker_limit_panics() {
    ThreadPool::builder().worker_limit(0);
}

#[test]
#[should_panic(expected = "a fixed pool must start with at least one worker")]
fn fixed_start_with_zero_workers_panics() {
    ThreadPool::new().start_with(0);
}

#[test]
#[should_panic(expected = "initial worker count cannot exceed the worker limit")]
fn cached_start_above_worker_limit_panics() {
    let pool = ThreadPool::builder()
        .mode(PoolMode::Cached)
        .worker_limit(2)
        .build();
    pool.start_with(3);
}

#[test]
fn execute() {
    let pool = fixed(1);

    assert_eq!(pool.execute(|| 2 + 2).get(), Some(4));
}

#[test]
fn submit_trait_task() {
    let pool = fixed(1);

    let mut result = pool.submit(SumRange { from: 1, to: 10 });
    assert!(result.is_valid());
    assert_eq!(result.get().unwrap().cast::<u64>().unwrap(), 55);
}

#[test]
fn results_delivered_exactly_once() {
    let pool = fixed(1);

    let mut result = pool.submit(SumRange { from: 1, to: 4 });
    assert!(result.get().is_some());
    assert!(result.get().is_none());

    // The handle stays valid; only the value is gone.
    assert!(result.is_valid());
}

#[test]
fn mixed_result_types() {
    let pool = fixed(2);

    let a = pool.execute(|| 1 + 2);
    let b = pool.execute(|| 1 + 2 + 3);
    let mut c = pool.submit(SumRange { from: 1, to: 100 });

    assert_eq!(a.get(), Some(3));
    assert_eq!(b.get(), Some(6));
    assert_eq!(c.get().unwrap().cast::<u64>().unwrap(), 5050);
}

#[test]
fn cast_to_wrong_type_fails() {
    let value = TaskValue::new(String::from("five"));
    assert!(value.is::<String>());

    let err = value.cast::<i32>().unwrap_err();
    assert!(err.stored().contains("String"));
    assert_eq!(err.requested(), "i32");
}

#[test]
fn tasks_run_in_submission_order() {
    let pool = fixed(1);

    // Hold the only worker on a gate so the submissions below pile up in
    // the queue.
    let (gate_tx, gate_rx) = bounded::<()>(0);
    let gate = pool.execute(move || {
        let _ = gate_rx.recv();
    });
    thread::sleep(Duration::from_millis(50));

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut promises = Vec::new();

    for i in 0..8 {
        let order = Arc::clone(&order);
        promises.push(pool.execute(move || order.lock().unwrap().push(i)));
    }

    gate_tx.send(()).unwrap();
    gate.get();

    for promise in promises {
        promise.get();
    }

    assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
}

#[test]
fn full_queue_rejects_submission_after_timeout() {
    let pool = ThreadPool::builder()
        .queue_capacity(2)
        .submit_timeout(Duration::from_millis(200))
        .build();
    pool.start_with(1);

    let (gate_tx, gate_rx) = bounded::<()>(0);
    let gate = pool.execute(move || {
        let _ = gate_rx.recv();
    });
    thread::sleep(Duration::from_millis(50));

    let first = pool.execute(|| ());
    let second = pool.execute(|| ());
    assert!(first.is_valid());
    assert!(second.is_valid());

    let started = Instant::now();
    let rejected = pool.execute(|| ());
    let waited = started.elapsed();

    assert!(!rejected.is_valid());
    assert!(waited >= Duration::from_millis(200));

    // A rejected promise yields nothing, without blocking.
    assert_eq!(rejected.get(), None);

    drop(gate_tx);
    gate.get();
    first.get();
    second.get();
}

#[test]
fn fixed_pool_never_changes_size() {
    let pool = fixed(2);
    assert_eq!(pool.threads(), 2);

    let promises: Vec<_> = (0..20).map(|i| pool.execute(move || i * 2)).collect();

    for (i, promise) in promises.into_iter().enumerate() {
        assert_eq!(promise.get(), Some(i * 2));
    }

    assert_eq!(pool.threads(), 2);
}

#[test]
fn cached_pool_grows_under_burst_up_to_limit() {
    let pool = ThreadPool::builder()
        .mode(PoolMode::Cached)
        .worker_limit(3)
        .build();
    pool.start_with(1);
    assert_eq!(pool.threads(), 1);

    let (gate_tx, gate_rx) = bounded::<()>(0);
    let mut promises = Vec::new();

    for _ in 0..6 {
        let gate_rx = gate_rx.clone();
        promises.push(pool.execute(move || {
            let _ = gate_rx.recv();
        }));
        thread::sleep(Duration::from_millis(50));
    }

    // Three of the six tasks are running, the rest are queued; the pool
    // grew to its limit and no further.
    assert_eq!(pool.threads(), 3);

    drop(gate_tx);

    for promise in promises {
        assert_eq!(promise.get(), Some(()));
    }

    // The default idle timeout is nowhere near elapsed, so no shrink yet.
    assert_eq!(pool.threads(), 3);
}

#[test]
fn cached_pool_shrinks_back_to_initial_size() {
    let pool = ThreadPool::builder()
        .mode(PoolMode::Cached)
        .worker_limit(4)
        .idle_timeout(Duration::from_millis(100))
        .build();
    pool.start_with(1);

    let (gate_tx, gate_rx) = bounded::<()>(0);
    let mut promises = Vec::new();

    for _ in 0..3 {
        let gate_rx = gate_rx.clone();
        promises.push(pool.execute(move || {
            let _ = gate_rx.recv();
        }));
        thread::sleep(Duration::from_millis(50));
    }

    assert!(pool.threads() > 1);

    drop(gate_tx);

    for promise in promises {
        promise.get();
    }

    // Surplus workers notice the elapsed idle time on their next queue
    // poll (one-second cadence) and retire down to the starting count.
    thread::sleep(Duration::from_millis(2500));
    assert_eq!(pool.threads(), 1);
}

#[test]
fn shutdown_drains_queued_tasks() {
    let pool = fixed(1);

    let (gate_tx, gate_rx) = bounded::<()>(0);
    let gate = pool.execute(move || {
        let _ = gate_rx.recv();
    });
    thread::sleep(Duration::from_millis(50));

    let counter = Arc::new(AtomicUsize::new(0));
    let mut promises = Vec::new();

    for _ in 0..5 {
        let counter = Arc::clone(&counter);
        promises.push(pool.execute(move || counter.fetch_add(1, Ordering::SeqCst)));
    }

    drop(gate_tx);
    pool.shutdown();

    // Everything enqueued before the teardown still ran, exactly once.
    assert_eq!(counter.load(Ordering::SeqCst), 5);
    assert_eq!(pool.completed_tasks(), 6);
    assert_eq!(pool.threads(), 0);

    gate.get();
    for promise in promises {
        assert!(promise.get().is_some());
    }
}

#[test]
fn submission_after_shutdown_is_rejected() {
    let pool = fixed(1);
    pool.shutdown();
    assert!(!pool.is_running());

    let result = pool.submit(SumRange { from: 1, to: 10 });
    assert!(!result.is_valid());
}

#[test]
fn shutdown_without_start_unblocks_pending_results() {
    let pool = ThreadPool::new();

    // No workers exist yet, so this task just sits in the queue.
    let mut result = pool.submit(SumRange { from: 1, to: 10 });
    assert!(result.is_valid());
    assert_eq!(pool.queued_tasks(), 1);

    pool.shutdown();

    // The task can never run now; its handle reports that instead of
    // blocking forever.
    assert!(result.get().is_none());
}

#[test]
fn panicking_task_is_contained() {
    let pool = fixed(1);

    let failed = pool.execute(|| -> i32 { panic!("boom") });
    assert_eq!(failed.get(), None);
    assert_eq!(pool.panicked_tasks(), 1);

    // The worker survived and keeps serving tasks.
    assert_eq!(pool.execute(|| 2 + 2).get(), Some(4));
    assert_eq!(pool.threads(), 1);
}

#[test]
fn second_start_is_ignored() {
    let pool = fixed(2);
    pool.start_with(5);

    assert_eq!(pool.threads(), 2);
}

#[test]
fn completed_task_count() {
    let pool = fixed(1);
    assert_eq!(pool.completed_tasks(), 0);

    pool.execute(|| 2 + 2).get();
    assert_eq!(pool.completed_tasks(), 1);

    pool.execute(|| 2 + 2).get();
    assert_eq!(pool.completed_tasks(), 2);
}

#[test]
fn dropped_promise_does_not_cancel_the_task() {
    let pool = fixed(1);
    let counter = Arc::new(AtomicUsize::new(0));

    {
        let counter = Arc::clone(&counter);
        drop(pool.execute(move || counter.fetch_add(1, Ordering::SeqCst)));
    }

    // Dropping the handle discards the value, not the work.
    while pool.completed_tasks() < 1 {
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn common_pool() {
    let promise = threadmill::common().execute(|| 21 * 2);
    assert_eq!(promise.get(), Some(42));

    // The shared pool exists now, so late configuration is refused.
    assert!(threadmill::configure_common(|builder| builder).is_err());
}
