//! Change Signal - release every blocked reader when a book changes.
//!
//! Waiters clone the receiving end of the current generation's channel.
//! Notifying replaces the generation, which drops its only sender and
//! disconnects every receiver handed out so far. When nobody is waiting the
//! notifier touches a single atomic and returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

/// Why a wait returned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    /// The book changed (spurious wake-ups are possible)
    Changed,
    /// The caller's cancellation channel fired or was dropped
    Cancelled,
    TimedOut,
}

struct Generation {
    // Never sent on; dropping it is the broadcast
    _tx: Sender<()>,
    rx: Receiver<()>,
}

impl Generation {
    fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self { _tx: tx, rx }
    }
}

pub struct ChangeSignal {
    waiting: AtomicBool,
    current: Mutex<Generation>,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self {
            waiting: AtomicBool::new(false),
            current: Mutex::new(Generation::new()),
        }
    }

    /// Register interest in the next change.
    ///
    /// The returned receiver disconnects when `notify` runs.
    pub fn subscribe(&self) -> Receiver<()> {
        let current = self.current.lock();
        self.waiting.store(true, Ordering::Release);
        current.rx.clone()
    }

    /// Release all current waiters. Returns false when nobody was waiting.
    pub fn notify(&self) -> bool {
        if !self.waiting.load(Ordering::Acquire) {
            return false;
        }
        let mut current = self.current.lock();
        if !self.waiting.swap(false, Ordering::AcqRel) {
            return false;
        }
        *current = Generation::new();
        true
    }

    /// Block until the next change or until `cancel` yields or disconnects.
    pub fn wait(&self, cancel: &Receiver<()>) -> Wake {
        let changed = self.subscribe();
        channel::select! {
            recv(changed) -> _ => Wake::Changed,
            recv(cancel) -> _ => Wake::Cancelled,
        }
    }

    /// Block until the next change or until `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Wake {
        match self.subscribe().recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => Wake::TimedOut,
            _ => Wake::Changed,
        }
    }

    /// True while at least one reader is registered for the next change
    #[inline]
    pub fn has_waiters(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }
}

impl Default for ChangeSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_notify_without_waiters_is_noop() {
        let signal = ChangeSignal::new();
        assert!(!signal.has_waiters());
        assert!(!signal.notify());
    }

    #[test]
    fn test_subscribe_then_notify_disconnects() {
        let signal = ChangeSignal::new();
        let rx = signal.subscribe();
        assert!(signal.has_waiters());
        assert!(signal.notify());
        assert!(rx.recv().is_err(), "receiver should be disconnected");
        assert!(!signal.has_waiters());
    }

    #[test]
    fn test_releases_all_waiters() {
        let signal = Arc::new(ChangeSignal::new());
        let (_keep, cancel) = channel::bounded::<()>(0);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                let cancel = cancel.clone();
                thread::spawn(move || signal.wait(&cancel))
            })
            .collect();

        // Keep notifying until every thread has registered and woken
        while !handles.iter().all(|h| h.is_finished()) {
            signal.notify();
            thread::sleep(Duration::from_millis(1));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Wake::Changed);
        }
    }

    #[test]
    fn test_cancel_releases_waiter() {
        let signal = ChangeSignal::new();
        let (stop, cancel) = channel::bounded::<()>(1);
        stop.send(()).unwrap();
        assert_eq!(signal.wait(&cancel), Wake::Cancelled);

        let (stop, cancel) = channel::bounded::<()>(0);
        drop(stop);
        assert_eq!(signal.wait(&cancel), Wake::Cancelled);
    }

    #[test]
    fn test_wait_timeout() {
        let signal = ChangeSignal::new();
        assert_eq!(signal.wait_timeout(Duration::from_millis(5)), Wake::TimedOut);
    }
}
