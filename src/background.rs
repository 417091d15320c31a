//
// background.rs
// Odf-Tools-rs
//
// Moves blocking conversion stages (NIfTI/MAT IO, peak extraction) off the async runtime with a stop flag tied to the caller.
//
// Thales Matheus Mendonça Santos - November 2025

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{ConvertError, Result};

/// Shared flag telling blocking work to give up at its next checkpoint.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once the signal has been raised.
    pub fn check(&self) -> Result<()> {
        if self.is_stopped() {
            Err(ConvertError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Raises the signal when dropped.
struct StopOnDrop(StopSignal);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// Runs `work` on tokio's blocking pool. If the returned future is dropped
/// before completion, the signal passed to `work` is raised.
pub async fn run_blocking<T, W>(work: W) -> Result<T>
where
    T: Send + 'static,
    W: FnOnce(StopSignal) -> Result<T> + Send + 'static,
{
    let signal = StopSignal::new();
    let _guard = StopOnDrop(signal.clone());
    tokio::task::spawn_blocking(move || {
        let outcome = work(signal);
        if matches!(outcome, Err(ConvertError::Cancelled)) {
            debug!("blocking stage stopped early");
        }
        outcome
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn results_come_back_from_the_blocking_pool() {
        let value = run_blocking(|_| Ok(21 * 2)).await.expect("blocking work");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn dropping_the_future_raises_the_signal() {
        let seen = StopSignal::new();
        let observer = seen.clone();
        let work = run_blocking(move |signal| {
            let started = Instant::now();
            while !signal.is_stopped() {
                if started.elapsed() > Duration::from_secs(5) {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            observer.stop();
            signal.check()
        });

        tokio::select! {
            _ = work => panic!("work should have been abandoned"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }

        let started = Instant::now();
        while !seen.is_stopped() && started.elapsed() < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seen.is_stopped());
    }

    #[test]
    fn check_reports_cancellation() {
        let signal = StopSignal::new();
        assert!(signal.check().is_ok());
        signal.stop();
        assert!(matches!(signal.check(), Err(ConvertError::Cancelled)));
    }

    #[tokio::test]
    async fn panics_surface_as_background_errors() {
        let err = run_blocking::<(), _>(|_| panic!("boom")).await.unwrap_err();
        assert!(matches!(err, ConvertError::Background(_)));
    }
}
