//! The single deadline and cancellation token governing one capture.
//!
//! A [`Deadline`] is created once at the top of a capture and every suspension
//! point runs through it, so expiry or cancellation anywhere aborts the
//! remaining steps.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Why a guarded wait was cut short
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    DeadlineExceeded,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
    cancel: CancellationToken,
}

impl Deadline {
    pub fn new(budget: Duration, cancel: CancellationToken) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
            cancel,
        }
    }

    pub fn after(budget: Duration) -> Self {
        Self::new(budget, CancellationToken::new())
    }

    /// The total budget this deadline was created with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the deadline passes or the token is cancelled.
    pub async fn interrupted(&self) -> Interrupted {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Interrupted::Cancelled,
            _ = sleep_until(self.at) => Interrupted::DeadlineExceeded,
        }
    }

    /// Run `fut` unless the deadline or cancellation fires first.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            interrupted = self.interrupted() => Err(interrupted),
            output = fut => Ok(output),
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.run(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_before_deadline() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let out = deadline
            .run(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                42
            })
            .await;
        assert_eq!(out, Ok(42));
        assert_eq!(deadline.remaining(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_hits_deadline() {
        let deadline = Deadline::after(Duration::from_secs(2));
        let start = Instant::now();
        let out = deadline.run(std::future::pending::<()>()).await;

        assert_eq!(out, Err(Interrupted::DeadlineExceeded));
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_wins() {
        let token = CancellationToken::new();
        let deadline = Deadline::new(Duration::from_secs(60), token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let out = deadline.sleep(Duration::from_secs(30)).await;
        assert_eq!(out, Err(Interrupted::Cancelled));
        assert!(deadline.is_cancelled());
        canceller.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_wakes_on_cancel() {
        use tokio_test::{assert_pending, assert_ready_eq, task};

        let token = CancellationToken::new();
        let deadline = Deadline::new(Duration::from_secs(60), token.clone());
        let mut waiting = task::spawn(deadline.interrupted());

        assert_pending!(waiting.poll());
        token.cancel();
        assert!(waiting.is_woken());
        assert_ready_eq!(waiting.poll(), Interrupted::Cancelled);
    }
}
