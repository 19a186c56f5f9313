//! Cancellation and per-call deadlines.
//!
//! Every suspend point in a run goes through [`guard`], which races the
//! stage future against its timeout and the caller's [`CancelToken`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

/// Cloneable cancellation signal. Cancelling any clone cancels them all.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel()` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|flag| *flag).await.is_err() {
            // Sender lives in `self`, so the channel cannot close under us.
            std::future::pending::<()>().await;
        }
    }
}

/// The run was cancelled while a stage was suspended.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Extraction cancelled")]
pub struct Cancelled;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Interrupted {
    #[error("Extraction cancelled")]
    Cancelled,

    #[error("{stage} timed out after {}s", .limit.as_secs())]
    TimedOut { stage: &'static str, limit: Duration },
}

/// Run `fut` unless it outlives `limit` or the run is cancelled first.
///
/// Cancellation wins ties so an already-cancelled run never starts new work.
pub async fn guard<F>(
    stage: &'static str,
    limit: Duration,
    cancel: &CancelToken,
    fut: F,
) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    if cancel.is_cancelled() {
        return Err(Interrupted::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        out = tokio::time::timeout(limit, fut) => {
            out.map_err(|_| Interrupted::TimedOut { stage, limit })
        }
    }
}
