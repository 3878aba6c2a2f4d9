//! Job observation: push callbacks and snapshot fan-out.
//!
//! Callbacks run synchronously on the job's worker thread. Anything that needs
//! to relay progress to several threads (a web handler streaming to many
//! viewers, a terminal renderer on an async runtime) should subscribe to a
//! [`JobWatch`] instead, or forward from the callback into its own channel.

use std::fmt;
use std::sync::Arc;

use crate::job::JobSnapshot;

/// Progress callback: `(downloaded, total)`, where `total` is 0 while unknown.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Status callback: receives `running`, `done`, `failed` or `cancelled`.
pub type StatusFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Receiver of the latest snapshot of one job. Cloneable; every clone sees the
/// most recent value, intermediate values may be skipped.
pub type JobWatch = tokio::sync::watch::Receiver<JobSnapshot>;

/// Optional callbacks attached to a job before it starts.
#[derive(Clone, Default)]
pub struct Observers {
    pub(crate) progress: Option<ProgressFn>,
    pub(crate) status: Option<StatusFn>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(f));
        self
    }

    pub fn on_status<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.status = Some(Arc::new(f));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.progress.is_none() && self.status.is_none()
    }

    pub(crate) fn progress(&self, downloaded: u64, total: u64) {
        if let Some(f) = &self.progress {
            f(downloaded, total);
        }
    }

    pub(crate) fn status(&self, status: &str) {
        if let Some(f) = &self.status {
            f(status);
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("progress", &self.progress.is_some())
            .field("status", &self.status.is_some())
            .finish()
    }
}
