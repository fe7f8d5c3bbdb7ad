//! Execution engine - bounded runs, retry loops, pipeline sequencing

pub mod pipeline;
pub mod process;
pub mod retry;

pub use pipeline::{PipelineError, PipelineEvent, PipelineExecutor};
pub use process::{BoundedExecutor, CommandLine, SpawnError};
pub use retry::{RetryController, RetryError};

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Cooperative cancellation for a whole pipeline run
///
/// Cancelling aborts the active bounded execution and skips remaining steps
/// and continuations. The token is observed, never reset.
#[derive(Debug, Default)]
pub struct CancelToken {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before the re-check so a cancel between the check and
            // the await cannot be missed
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
