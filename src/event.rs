//! One-shot completion event.
//!
//! An [`Event`] starts unsignaled. [`Event::signal`] moves it to the signaled state for good and
//! wakes every waiter; there is no way back.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct Event {
    finished: Mutex<bool>,
    finished_cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the event as finished and wake all waiters
    pub fn signal(&self) {
        {
            let mut finished = self.finished.lock();
            *finished = true;
        }
        self.finished_cond.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        *self.finished.lock()
    }

    /// Block until the event is signaled
    pub fn wait(&self) {
        let mut finished = self.finished.lock();
        while !*finished {
            self.finished_cond.wait(&mut finished);
        }
    }

    /// Block until the event is signaled or `timeout` elapses; returns whether it was signaled
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut finished = self.finished.lock();
        if *finished {
            return true;
        }
        let _ = self
            .finished_cond
            .wait_while_for(&mut finished, |finished| !*finished, timeout);
        *finished
    }
}
