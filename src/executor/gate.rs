//! Submitter fairness gate.
//!
//! Counts submitters that are mid-push. Before each dequeue the executor
//! waits (bounded) for the count to reach zero and then yields once.
//! Nothing depends on it for correctness; the queue is already safe for
//! interleaved pushes and pops.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// In-flight submitter counter.
#[derive(Debug, Default)]
pub struct SubmitGate {
    in_flight: Mutex<usize>,
    idle: Condvar,
}

/// Marks one submitter as in flight until dropped.
#[derive(Debug)]
pub struct SubmitGuard<'a> {
    gate: &'a SubmitGate,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.gate.in_flight.lock().expect("gate mutex poisoned");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.gate.idle.notify_all();
        }
    }
}

impl SubmitGate {
    /// Creates an idle gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an in-flight submitter.
    pub fn enter(&self) -> SubmitGuard<'_> {
        *self.in_flight.lock().expect("gate mutex poisoned") += 1;
        SubmitGuard { gate: self }
    }

    /// Number of submitters currently mid-push.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock().expect("gate mutex poisoned")
    }

    /// Waits up to `max_wait` for no submitter to be in flight.
    ///
    /// Returns `true` if the gate went idle in time.
    pub fn wait_idle(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        let mut count = self.in_flight.lock().expect("gate mutex poisoned");
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self
                .idle
                .wait_timeout(count, deadline - now)
                .expect("gate mutex poisoned")
                .0;
        }
        true
    }
}
