//! Cooperative cancellation of worker threads.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A one-way stop flag shared between a supervisor and a worker thread.
///
/// Clones share the same flag. A worker checks [`ThreadLifetime::should_stop`] at the top of
/// each iteration of its loop, so it finishes the iteration in progress before exiting.
#[derive(Clone, Debug, Default)]
pub struct ThreadLifetime {
    stop: Arc<AtomicBool>,
}

impl ThreadLifetime {
    /// Creates a running lifetime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once [`ThreadLifetime::stop`] has been called on any clone.
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Requests the thread to stop. There is no way back.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_seen_from_other_threads() {
        let lifetime = ThreadLifetime::new();
        assert!(!lifetime.should_stop());

        let l = lifetime.clone();
        std::thread::spawn(move || l.stop()).join().unwrap();
        assert!(lifetime.should_stop());

        let l = lifetime.clone();
        assert!(std::thread::spawn(move || l.should_stop()).join().unwrap());
        lifetime.stop();
        assert!(lifetime.should_stop());
    }
}
