//! # Timed Sub-operation Slot
//!
//! A slot holds at most one in-flight background task. Launching while the
//! previous task is still running is a guarded no-op, so a device can never
//! have two overlapping timed operations writing the same tags.
//!
//! Cancellation aborts the task at its next suspension point. Sub-operations
//! only suspend between complete register writes, so an aborted task never
//! leaves a tag half written.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Launch-if-idle slot for one timed sub-operation.
#[derive(Debug)]
pub struct TaskSlot {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl TaskSlot {
    pub fn new(name: &'static str) -> Self {
        Self { name, handle: None }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A task was launched and has not completed.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        !self.is_running()
    }

    /// Spawn `task` unless the previous one is still running.
    /// Returns whether the task was launched.
    pub fn launch<F>(&mut self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_running() {
            return false;
        }
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot launch {}: {}", self.name, e);
                return false;
            }
        };
        debug!("Launching {}", self.name);
        self.handle = Some(runtime.spawn(task));
        true
    }

    /// Occupy the slot for `period` without doing anything else. Used for
    /// periodic updates whose work is done before the hold starts.
    pub fn hold(&mut self, period: Duration) -> bool {
        self.launch(async move { tokio::time::sleep(period).await })
    }

    /// Abort the running task, if any. Returns whether one was running.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                if running {
                    debug!("Cancelled {}", self.name);
                }
                running
            }
            None => false,
        }
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    fn counting_task(counter: Arc<AtomicU32>, steps: u32) -> impl Future<Output = ()> + Send {
        async move {
            for _ in 0..steps {
                counter.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_secs(1)).await;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_if_idle() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut slot = TaskSlot::new("test");
        assert!(slot.is_idle());

        assert!(slot.launch(counting_task(counter.clone(), 2)));
        assert!(slot.is_running());
        assert!(!slot.launch(counting_task(counter.clone(), 100)));

        sleep(Duration::from_millis(2500)).await;
        assert!(slot.is_idle());
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        assert!(slot.launch(counting_task(counter.clone(), 1)));
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_task() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut slot = TaskSlot::new("test");
        slot.launch(counting_task(counter.clone(), 10));
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        assert!(slot.cancel());
        assert!(slot.is_idle());
        sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(!slot.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_and_drop() {
        let mut slot = TaskSlot::new("hold");
        assert!(slot.hold(Duration::from_secs(2)));
        assert!(!slot.hold(Duration::from_secs(2)));
        sleep(Duration::from_millis(2100)).await;
        assert!(slot.hold(Duration::from_secs(2)));

        let counter = Arc::new(AtomicU32::new(0));
        {
            let mut dropped = TaskSlot::new("dropped");
            dropped.launch(counting_task(counter.clone(), 10));
            sleep(Duration::from_millis(500)).await;
        }
        sleep(Duration::from_secs(3)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_launch_without_runtime() {
        let mut slot = TaskSlot::new("orphan");
        assert!(!slot.hold(Duration::from_secs(1)));
        assert!(slot.is_idle());
    }
}
