//! Single-shot wait/notify primitive bound to a [`crate::message::Message`].

use std::sync::{Condvar, Mutex};

/// A single-shot completion event.
///
/// Starts not-complete. A single `notify()` transitions it to complete and
/// wakes every thread blocked in `wait()`. Calling `notify()` more than once
/// is harmless — the state only ever moves one way.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    complete: Mutex<bool>,
    condvar: Condvar,
}

impl CompletionLatch {
    /// Create a new, not-complete latch.
    pub fn new() -> Self {
        Self {
            complete: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Block the calling thread until `notify()` has been called.
    ///
    /// Returns immediately if the latch is already complete.
    pub fn wait(&self) {
        let mut complete = self.complete.lock().expect("completion latch poisoned");
        while !*complete {
            complete = self.condvar.wait(complete).expect("completion latch poisoned");
        }
    }

    /// Mark the latch complete and wake every waiter.
    ///
    /// The lock guarding `complete` is released before `notify_all` so
    /// waiters don't immediately re-block on a mutex we're still holding.
    pub fn notify(&self) {
        let mut complete = self.complete.lock().expect("completion latch poisoned");
        *complete = true;
        drop(complete);
        self.condvar.notify_all();
    }
}
