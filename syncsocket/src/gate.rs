//! One-shot release gate
//!
//! A [`Gate`] starts closed; any number of threads may wait on it with a
//! deadline, and the first [`release`](Gate::release) lets all of them
//! through. Later releases are no-ops.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Latch released at most once
#[derive(Debug, Default)]
pub struct Gate {
    released: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    /// A closed gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate; returns false if it was already open
    pub fn release(&self) -> bool {
        let mut released = self.released.lock();
        if *released {
            return false;
        }
        *released = true;
        self.cond.notify_all();
        true
    }

    /// Whether the gate has been released
    pub fn is_released(&self) -> bool {
        *self.released.lock()
    }

    /// Block until the gate is released or `timeout` elapses
    ///
    /// Returns whether the gate was released.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut released = self.released.lock();
        while !*released {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut released, deadline).timed_out() {
                        return *released;
                    }
                }
                None => self.cond.wait(&mut released),
            }
        }
        true
    }
}
