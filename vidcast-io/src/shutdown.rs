//! Cooperative shutdown signal
//!
//! A channel that never carries messages: triggering drops the only sender,
//! which wakes every receiver blocked on it. Waiting on the channel with a
//! deadline doubles as a cancellable sleep.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Create a connected trigger/observer pair
pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (sender, receiver) = channel::bounded(0);
    (
        ShutdownHandle {
            sender: Arc::new(Mutex::new(Some(sender))),
        },
        Shutdown { receiver },
    )
}

/// Triggers shutdown; cheap to clone into signal handlers
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: Arc<Mutex<Option<Sender<()>>>>,
}

impl ShutdownHandle {
    /// Signal every observer. Idempotent.
    pub fn trigger(&self) {
        if self.sender.lock().take().is_some() {
            tracing::debug!("shutdown triggered");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.sender.lock().is_none()
    }
}

/// Observes shutdown
#[derive(Clone)]
pub struct Shutdown {
    receiver: Receiver<()>,
}

impl Shutdown {
    /// An observer that never fires (for tests and one-shot tools)
    pub fn never() -> Self {
        let (handle, shutdown) = shutdown_channel();
        // Leaking the sender keeps the channel connected forever
        std::mem::forget(handle);
        shutdown
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected) | Ok(()))
    }

    /// Block until `deadline`. Returns `false` if shutdown interrupted the wait.
    pub fn sleep_until(&self, deadline: Instant) -> bool {
        if Instant::now() >= deadline {
            return !self.is_triggered();
        }
        match self.receiver.recv_deadline(deadline) {
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) | Ok(()) => false,
        }
    }

    /// Block for `duration`. Returns `false` if shutdown interrupted the wait.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.sleep_until(Instant::now() + duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_sleep_completes() {
        let (_handle, shutdown) = shutdown_channel();
        let start = Instant::now();
        assert!(shutdown.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_trigger_wakes_sleepers() {
        let (handle, shutdown) = shutdown_channel();
        let observer = shutdown.clone();
        let sleeper = thread::spawn(move || observer.sleep(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(20));
        handle.trigger();
        handle.trigger();

        assert!(!sleeper.join().unwrap());
        assert!(shutdown.is_triggered());
        assert!(handle.is_triggered());
    }

    #[test]
    fn test_never() {
        let shutdown = Shutdown::never();
        assert!(!shutdown.is_triggered());
        assert!(shutdown.sleep(Duration::from_millis(1)));
    }
}
