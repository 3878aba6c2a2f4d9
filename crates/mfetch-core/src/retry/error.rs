//! Transfer error type for retry classification.

use std::path::PathBuf;
use thiserror::Error;

/// Error returned by a single transfer attempt. Kept typed (not anyhow) so the
/// controller can decide retries before flattening it into the job's message.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Destination volume cannot hold the artifact plus headroom. Not retried.
    #[error("insufficient disk space: need {required} bytes, {available} available")]
    InsufficientSpace { required: u64, available: u64 },
    /// Another running job is writing the same destination file. Not retried.
    #[error("destination busy: {} is being written by job {owner}", .path.display())]
    DestinationBusy { path: PathBuf, owner: String },
    /// Repository id or filename cannot form a fetch URL / local path. Not retried.
    #[error("invalid source: {0}")]
    InvalidSource(String),
    /// Curl reported an error (timeout, connection, etc.).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// HTTP response had an unexpected status.
    #[error("HTTP {0}")]
    Http(u32),
    /// Local file I/O failed.
    #[error("storage: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Network, HTTP and I/O failures are retried (the next attempt resumes);
    /// preconditions and bad input are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::InsufficientSpace { .. }
            | TransferError::DestinationBusy { .. }
            | TransferError::InvalidSource(_) => false,
            TransferError::Curl(_) | TransferError::Http(_) | TransferError::Io(_) => true,
        }
    }
}
