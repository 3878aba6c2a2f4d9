//! Per-job worker: claim the destination, run attempts with backoff, finalize.
//!
//! The worker is the only code that drives a job's own terminal transition.
//! It runs on a dedicated OS thread spawned by the registry.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::claims::{ClaimGuard, DestinationClaims};
use crate::job::{Job, JobStatus, Outcome};
use crate::observe::Observers;
use crate::retry::{exhausted_message, RetryDecision, RetryPolicy, TransferError};
use crate::transfer::{AttemptOutcome, TransferEngine};

/// Granularity of cancel checks while sleeping.
const CANCEL_POLL: Duration = Duration::from_millis(100);

pub(crate) fn run(
    job: Arc<Job>,
    engine: Arc<TransferEngine>,
    policy: RetryPolicy,
    claims: Arc<DestinationClaims>,
) {
    let observers = job.observers();
    job.notify_status(&observers, JobStatus::Running);
    tracing::info!(
        job_id = job.id(),
        repo = %job.source().repo_id,
        file = %job.source().filename,
        "job {} started",
        job.name()
    );

    let (outcome, claim) = match claim_destination(&job, &claims) {
        Ok(Some(guard)) => (drive(&job, &engine, &policy, &observers), Some(guard)),
        Ok(None) => (Outcome::Cancelled, None),
        Err(e) => (Outcome::Failed(e.to_string()), None),
    };

    let status = job.finish(outcome);
    drop(claim);
    job.notify_status(&observers, status);

    let snap = job.snapshot();
    match status {
        JobStatus::Done => tracing::info!(
            job_id = job.id(),
            bytes = snap.downloaded,
            "job {} completed: {}",
            job.name(),
            job.final_path().display()
        ),
        JobStatus::Failed => tracing::warn!(
            job_id = job.id(),
            "job {} failed: {}",
            job.name(),
            snap.error.as_deref().unwrap_or("unknown error")
        ),
        _ => tracing::info!(job_id = job.id(), "job {} cancelled", job.name()),
    }
}

/// Claim the final path. Waits for a previous owner that is already
/// cancelled (its worker is unwinding); fails for a live owner.
/// `Ok(None)` means this job was cancelled while waiting.
fn claim_destination(
    job: &Arc<Job>,
    claims: &Arc<DestinationClaims>,
) -> Result<Option<ClaimGuard>, TransferError> {
    loop {
        match claims.claim(job) {
            Ok(guard) => return Ok(Some(guard)),
            Err(owner) if owner.cancel_requested() => {
                if job.cancel_requested() {
                    return Ok(None);
                }
                thread::sleep(CANCEL_POLL);
            }
            Err(owner) => {
                return Err(TransferError::DestinationBusy {
                    path: job.final_path(),
                    owner: owner.id().to_string(),
                })
            }
        }
    }
}

/// Attempt loop.
fn drive(
    job: &Job,
    engine: &TransferEngine,
    policy: &RetryPolicy,
    observers: &Observers,
) -> Outcome {
    let mut attempt = 1u32;
    loop {
        if job.cancel_requested() {
            return Outcome::Cancelled;
        }
        tracing::debug!(job_id = job.id(), attempt, "starting attempt");
        let err = match engine.attempt(job, observers) {
            Ok(AttemptOutcome::Completed(path)) => return Outcome::Done(path),
            Ok(AttemptOutcome::Cancelled) => return Outcome::Cancelled,
            Err(e) => e,
        };
        match policy.decide(attempt, &err) {
            RetryDecision::RetryAfter(delay) => {
                tracing::warn!(
                    job_id = job.id(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, retrying: {}",
                    err
                );
                if !sleep_unless_cancelled(job, delay) {
                    return Outcome::Cancelled;
                }
                attempt += 1;
            }
            RetryDecision::NoRetry if err.is_retryable() => {
                return Outcome::Failed(exhausted_message(Some(&err.to_string())));
            }
            RetryDecision::NoRetry => return Outcome::Failed(err.to_string()),
        }
    }
}

/// Sleep for `total`, waking every [`CANCEL_POLL`]. Returns false if the job
/// was cancelled meanwhile.
fn sleep_unless_cancelled(job: &Job, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if job.cancel_requested() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}
