//! Cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared stop flag, polled once per generated token.
///
/// Clones observe the same flag, so a handle given to another thread can
/// stop a generation running on this one. Setting the flag never
/// interrupts a decode in progress.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; harmless when nothing is running.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let a = StopHandle::new();
        let b = a.clone();
        b.stop();
        b.stop();
        assert!(a.is_stopped());
        a.clear();
        assert!(!b.is_stopped());
    }

    #[test]
    fn stop_from_another_thread() {
        let handle = StopHandle::new();
        let remote = handle.clone();
        std::thread::spawn(move || remote.stop()).join().unwrap();
        assert!(handle.is_stopped());
    }
}
