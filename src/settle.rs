//! The post-load settle wait.
//!
//! After the load events the page may still be fetching resources. The wait
//! races a network idle signal against the configured wait duration and the
//! capture deadline, and reports which one resolved first.

use crate::deadline::{Deadline, Interrupted};
use futures::{Stream, StreamExt};
use std::future::{pending, Future};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// No network activity for the quiet window
    NetworkIdle,
    /// The configured wait (or what was left of the deadline) elapsed
    WaitElapsed,
    /// The deadline passed or the capture was cancelled
    Interrupted(Interrupted),
}

/// Wait for the page to settle.
///
/// The wait is clipped to what remains of `deadline`, so it never extends the
/// capture past it. `idle` may be any future; it is `pending` when network
/// idle detection is off.
pub async fn wait_for_settle<I>(idle: I, wait: Duration, deadline: &Deadline) -> SettleOutcome
where
    I: Future<Output = ()>,
{
    let wait = wait.min(deadline.remaining());

    tokio::select! {
        biased;
        _ = idle => SettleOutcome::NetworkIdle,
        _ = tokio::time::sleep(wait) => SettleOutcome::WaitElapsed,
        interrupted = deadline.interrupted() => SettleOutcome::Interrupted(interrupted),
    }
}

/// Network idle detector fed by `Network.loadingFinished` events
///
/// A background task consumes the event stream and fires once no event has
/// arrived for the quiet window. The task is aborted when the signal is
/// dropped.
#[derive(Debug)]
pub struct IdleSignal {
    fired: Option<oneshot::Receiver<()>>,
    task: Option<JoinHandle<()>>,
}

impl IdleSignal {
    pub fn spawn<S>(mut events: S, quiet: Duration) -> Self
    where
        S: Stream + Unpin + Send + 'static,
        S::Item: Send,
    {
        let (tx, rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut seen = 0usize;
            loop {
                match tokio::time::timeout(quiet, events.next()).await {
                    Ok(Some(_)) => seen += 1,
                    // stream closed: the connection is gone, never report idle
                    Ok(None) => return,
                    Err(_) => {
                        debug!(loads = seen, "Network idle");
                        let _ = tx.send(());
                        return;
                    }
                }
            }
        });

        Self {
            fired: Some(rx),
            task: Some(task),
        }
    }

    /// A signal that never fires.
    pub fn disabled() -> Self {
        Self {
            fired: None,
            task: None,
        }
    }

    pub async fn fired(&mut self) {
        match self.fired.as_mut() {
            Some(rx) => {
                if rx.await.is_err() {
                    pending::<()>().await;
                }
            }
            None => pending::<()>().await,
        }
    }
}

impl Drop for IdleSignal {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
