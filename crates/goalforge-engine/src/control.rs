//! Cooperative pause/cancel control for a running goal.

use crate::error::StageError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Cancel,
}

type Predicate = Arc<dyn Fn() -> ControlSignal + Send + Sync>;

/// Shared flags the CLI (or any other owner) flips to steer a run.
#[derive(Debug, Clone, Default)]
pub struct RunFlags {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl RunFlags {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn signal(&self) -> ControlSignal {
        if self.cancelled.load(Ordering::SeqCst) {
            ControlSignal::Cancel
        } else if self.paused.load(Ordering::SeqCst) {
            ControlSignal::Pause
        } else {
            ControlSignal::Run
        }
    }
}

#[derive(Clone)]
pub struct RunControl {
    predicate: Predicate,
    poll_interval: Duration,
}

impl std::fmt::Debug for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl")
            .field("signal", &(self.predicate)())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::always_run()
    }
}

impl RunControl {
    pub fn new<F>(predicate: F, poll_interval: Duration) -> Self
    where
        F: Fn() -> ControlSignal + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            poll_interval,
        }
    }

    pub fn always_run() -> Self {
        Self::new(|| ControlSignal::Run, Duration::from_millis(500))
    }

    pub fn from_flags(flags: RunFlags, poll_interval: Duration) -> Self {
        Self::new(move || flags.signal(), poll_interval)
    }

    pub fn signal(&self) -> ControlSignal {
        (self.predicate)()
    }

    /// Return immediately when running, wait out a pause, or fail with `Cancelled`.
    pub async fn checkpoint(&self) -> Result<(), StageError> {
        let mut announced = false;
        loop {
            match self.signal() {
                ControlSignal::Run => return Ok(()),
                ControlSignal::Cancel => return Err(StageError::Cancelled),
                ControlSignal::Pause => {
                    if !announced {
                        tracing::info!("paused; waiting to resume");
                        announced = true;
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_checkpoint_runs_and_cancels() {
        let flags = RunFlags::default();
        let control = RunControl::from_flags(flags.clone(), Duration::from_millis(1));
        assert!(control.checkpoint().await.is_ok());

        flags.cancel();
        assert!(matches!(control.checkpoint().await, Err(StageError::Cancelled)));
    }

    #[tokio::test]
    async fn test_checkpoint_waits_out_pause() {
        let flags = RunFlags::default();
        flags.pause();
        let control = RunControl::from_flags(flags.clone(), Duration::from_millis(1));

        let resumer = tokio::spawn({
            let flags = flags.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flags.resume();
            }
        });
        assert!(control.checkpoint().await.is_ok());
        resumer.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_pause() {
        let flags = RunFlags::default();
        flags.pause();
        let control = RunControl::from_flags(flags.clone(), Duration::from_millis(1));
        let canceller = tokio::spawn({
            let flags = flags.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flags.cancel();
            }
        });
        assert!(matches!(control.checkpoint().await, Err(StageError::Cancelled)));
        canceller.await.unwrap();
    }
}
