//! One-shot latch.
//!
//! Starts closed, is opened exactly once, and never closes again. Waiting on
//! an open latch returns immediately without taking the lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Blocks waiters until an event has happened at least once.
#[derive(Debug, Default)]
pub struct Latch {
    open: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Latch {
    /// Create a closed latch.
    pub const fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Whether the latch has been opened.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Open the latch and wake every waiter.
    ///
    /// Returns `true` for the call that actually opened it.
    pub fn open(&self) -> bool {
        if self.is_open() {
            return false;
        }

        // Flag is set under the lock so a waiter cannot check it and then
        // miss the notification.
        let _guard = self.lock.lock();
        let opened = !self.open.swap(true, Ordering::AcqRel);
        self.cond.notify_all();
        opened
    }

    /// Block until the latch is open.
    pub fn wait(&self) {
        if self.is_open() {
            return;
        }

        let mut guard = self.lock.lock();
        while !self.is_open() {
            self.cond.wait(&mut guard);
        }
    }

    /// Block until the latch is open or `timeout` elapses.
    ///
    /// Returns whether the latch is open.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_open() {
            return true;
        }

        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while !self.is_open() {
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                return self.is_open();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_closed() {
        let latch = Latch::new();
        assert!(!latch.is_open());
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn opens_once() {
        let latch = Latch::new();
        assert!(latch.open());
        assert!(!latch.open());
        assert!(latch.is_open());
        latch.wait();
    }

    #[test]
    fn wakes_blocked_waiters() {
        let latch = Arc::new(Latch::new());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let latch = Arc::clone(&latch);
                thread::spawn(move || latch.wait_timeout(Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        latch.open();

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }
}
