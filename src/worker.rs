use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use log::debug;

use crate::pool::{PoolMode, Shared};

/// How long a cached-mode worker waits on the queue before re-checking its
/// accumulated idle time.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A worker's entry in the pool registry.
///
/// The pool never owns the worker's thread handle; the thread removes this
/// entry itself, under the pool lock, as its last act. Worker ids are handed
/// out by the pool's own counter and are unique for the pool's lifetime.
pub(crate) struct Worker {
    id: usize,
}

impl Worker {
    pub(crate) fn new(id: usize) -> Self {
        Self { id }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }
}

/// The dispatch loop: the only place task execution happens.
///
/// Holding the pool lock, the loop waits for the queue to become non-empty,
/// dequeues the oldest entry, re-signals other idle workers if entries
/// remain, signals blocked submitters that capacity freed up, and then runs
/// the task with the lock released.
///
/// Exits happen only from the empty-queue wait: on shutdown (so a non-empty
/// queue is always drained first), or in cached mode when the worker has
/// been idle past the pool's idle timeout while the pool is above its
/// initial size.
pub(crate) fn run(shared: Arc<Shared>, id: usize) {
    let mut last_active = Instant::now();

    loop {
        let entry = {
            let mut state = shared.state.lock().unwrap();

            loop {
                if !state.queue.is_empty() {
                    break;
                }

                if !state.is_running() {
                    state.idle_workers -= 1;
                    state.deregister(id);
                    shared.all_exited.notify_all();
                    debug!("worker {} exiting, pool shut down", id);
                    return;
                }

                match shared.config.mode {
                    PoolMode::Cached => {
                        let (guard, timeout) = shared
                            .not_empty
                            .wait_timeout(state, IDLE_POLL_INTERVAL)
                            .unwrap();
                        state = guard;

                        if timeout.timed_out()
                            && last_active.elapsed() >= shared.config.idle_timeout
                            && state.current_workers > state.initial_workers
                        {
                            state.idle_workers -= 1;
                            state.deregister(id);
                            shared.all_exited.notify_all();
                            debug!(
                                "worker {} idle past {:?}, retiring",
                                id, shared.config.idle_timeout
                            );
                            return;
                        }
                    }
                    PoolMode::Fixed => {
                        state = shared.not_empty.wait(state).unwrap();
                    }
                }
            }

            state.idle_workers -= 1;
            let entry = state.queue.pop_front();

            if !state.queue.is_empty() {
                // Let the other idle workers pick up the remaining entries
                // instead of hoarding the wakeup.
                shared.not_empty.notify_all();
            }

            // A dequeue always frees capacity for blocked submitters.
            shared.not_full.notify_all();

            entry
        };

        if let Some(entry) = entry {
            entry.execute(&shared);
        }

        shared.state.lock().unwrap().idle_workers += 1;
        last_active = Instant::now();
    }
}
