use std::sync::{Condvar, Mutex};

/// A counting signal used for exactly one producer-to-consumer handoff.
///
/// Once [`shut_down`](Semaphore::shut_down) has been called, `acquire` and
/// `release` return immediately without touching the count. The escape hatch
/// keeps a consumer from blocking forever on a handoff that can no longer
/// happen because the pool was torn down first.
pub(crate) struct Semaphore {
    state: Mutex<State>,
    cond: Condvar,
}

#[derive(Default)]
struct State {
    permits: usize,
    shut_down: bool,
}

impl Semaphore {
    /// Creates a semaphore with a count of zero.
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then consumes it.
    ///
    /// Returns without consuming anything if the semaphore was shut down.
    pub(crate) fn acquire(&self) {
        let mut state = self.state.lock().unwrap();

        loop {
            if state.shut_down {
                return;
            }

            if state.permits > 0 {
                state.permits -= 1;
                return;
            }

            state = self.cond.wait(state).unwrap();
        }
    }

    /// Adds one permit and wakes the waiters.
    ///
    /// All waiters may wake, but only one proceeds per released permit.
    pub(crate) fn release(&self) {
        let mut state = self.state.lock().unwrap();

        if state.shut_down {
            return;
        }

        state.permits += 1;
        self.cond.notify_all();
    }

    /// Puts the semaphore into the shut-down state and wakes every waiter.
    pub(crate) fn shut_down(&self) {
        let mut state = self.state.lock().unwrap();
        state.shut_down = true;
        self.cond.notify_all();
    }
}
