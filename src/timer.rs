//! Owned handles for simulated-latency timers

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Holds at most one pending timer. Arming a new timer cancels the old one.
#[derive(Debug, Default)]
pub struct TimerSlot {
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` after `delay`, cancelling whatever was pending.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }));
    }

    /// Spawns a long-running job (e.g. a ticker) in the slot
    pub fn spawn<F>(&mut self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(job));
    }

    /// Aborts the pending timer, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Forgets the handle without aborting. Used by a timer that has fired.
    pub fn release(&mut self) {
        self.handle = None;
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_rearm_cancels_previous() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut slot = TimerSlot::new();

        let first = Arc::clone(&fired);
        slot.arm(Duration::from_millis(100), async move {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = Arc::clone(&fired);
        slot.arm(Duration::from_millis(100), async move {
            second.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut slot = TimerSlot::new();
        let counter = Arc::clone(&fired);
        slot.arm(Duration::from_millis(50), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(slot.is_armed());
        slot.cancel();
        assert!(!slot.is_armed());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
