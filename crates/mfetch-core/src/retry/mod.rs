//! Retry and backoff policy.
//!
//! This module encapsulates error classification (which transfer failures are
//! worth another attempt) and exponential backoff decisions so that the job
//! worker and any future caller share a consistent policy.

mod error;
mod policy;

pub use error::TransferError;
pub use policy::{exhausted_message, RetryDecision, RetryPolicy, MAX_ATTEMPTS_EXCEEDED};
