//! Job record: one requested transfer and its observable state.
//!
//! Lifecycle fields (status, timestamps, error, final path) live behind a
//! per-job mutex so that an eager cancel from a caller and the worker's final
//! transition cannot both win. Byte counters are atomics written only by the
//! worker and readable from any thread; a snapshot may pair a fresh
//! `downloaded` with a stale `size`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::observe::{JobWatch, Observers};
use crate::transfer::staging;

/// Job identifier (UUID v4, never reused).
pub type JobId = String;

const SIZE_UNKNOWN: u64 = u64::MAX;

/// Job state. `queued -> running -> {done | failed | cancelled}`; a queued job
/// may also go straight to `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an artifact comes from: repository id plus the file path inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub repo_id: String,
    pub filename: String,
}

impl Source {
    pub fn new(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            filename: filename.into(),
        }
    }
}

/// Point-in-time copy of a job, safe to hand to any thread or serialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub repo_id: String,
    pub filename: String,
    pub status: JobStatus,
    /// Unix milliseconds.
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub error: Option<String>,
    pub downloaded: u64,
    pub size: Option<u64>,
    pub path: Option<PathBuf>,
    pub cancel_requested: bool,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fraction complete in [0.0, 1.0], or `None` while the size is unknown.
    pub fn fraction(&self) -> Option<f64> {
        match self.size {
            Some(0) => Some(1.0),
            Some(total) => Some((self.downloaded as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// How the worker ended a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Done(PathBuf),
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
struct Lifecycle {
    status: JobStatus,
    started_at: Option<SystemTime>,
    finished_at: Option<SystemTime>,
    error: Option<String>,
    path: Option<PathBuf>,
}

pub(crate) struct Job {
    id: JobId,
    name: String,
    source: Source,
    dest_dir: PathBuf,
    token: Option<String>,
    created_at: SystemTime,
    lifecycle: Mutex<Lifecycle>,
    downloaded: AtomicU64,
    size: AtomicU64,
    cancel: AtomicBool,
    observers: Mutex<Observers>,
    watch: tokio::sync::watch::Sender<JobSnapshot>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Job {
    pub(crate) fn new(
        name: String,
        source: Source,
        dest_dir: PathBuf,
        token: Option<String>,
    ) -> Self {
        let (watch, _) = tokio::sync::watch::channel(JobSnapshot::default());
        let job = Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            source,
            dest_dir,
            token,
            created_at: SystemTime::now(),
            lifecycle: Mutex::new(Lifecycle {
                status: JobStatus::Queued,
                started_at: None,
                finished_at: None,
                error: None,
                path: None,
            }),
            downloaded: AtomicU64::new(0),
            size: AtomicU64::new(SIZE_UNKNOWN),
            cancel: AtomicBool::new(false),
            observers: Mutex::new(Observers::default()),
            watch,
        };
        job.publish();
        job
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn source(&self) -> &Source {
        &self.source
    }

    pub(crate) fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    pub(crate) fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub(crate) fn final_path(&self) -> PathBuf {
        self.dest_dir.join(&self.source.filename)
    }

    pub(crate) fn staging_path(&self) -> PathBuf {
        staging::staging_path(&self.final_path())
    }

    pub(crate) fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub(crate) fn status(&self) -> JobStatus {
        lock(&self.lifecycle).status
    }

    /// Finish time, if terminal.
    pub(crate) fn finished_at(&self) -> Option<SystemTime> {
        lock(&self.lifecycle).finished_at
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub(crate) fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub(crate) fn size(&self) -> Option<u64> {
        match self.size.load(Ordering::Acquire) {
            SIZE_UNKNOWN => None,
            n => Some(n),
        }
    }

    pub(crate) fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Release);
    }

    /// Raise the byte counter to `offset`; never lowers it.
    pub(crate) fn record_progress(&self, offset: u64) {
        self.downloaded.fetch_max(offset, Ordering::AcqRel);
    }

    /// Attach callbacks; only allowed while the job is still queued.
    pub(crate) fn attach(&self, observers: Observers) -> bool {
        let lc = lock(&self.lifecycle);
        if lc.status != JobStatus::Queued {
            return false;
        }
        *lock(&self.observers) = observers;
        true
    }

    pub(crate) fn observers(&self) -> Observers {
        lock(&self.observers).clone()
    }

    /// `queued -> running`. Returns false if the job was not queued.
    pub(crate) fn begin(&self) -> bool {
        {
            let mut lc = lock(&self.lifecycle);
            if lc.status != JobStatus::Queued {
                return false;
            }
            lc.status = JobStatus::Running;
            lc.started_at = Some(SystemTime::now());
        }
        self.publish();
        true
    }

    /// Set the cancel flag and mark an active job `cancelled` right away.
    /// Returns false if the job is already terminal.
    pub(crate) fn request_cancel(&self) -> bool {
        {
            let mut lc = lock(&self.lifecycle);
            if lc.status.is_terminal() {
                return false;
            }
            self.cancel.store(true, Ordering::Release);
            lc.status = JobStatus::Cancelled;
            lc.finished_at = Some(SystemTime::now());
        }
        self.publish();
        true
    }

    /// Move to a terminal state. If the job already reached one (an eager
    /// cancel), that state is kept. Returns the state the job ends in.
    pub(crate) fn finish(&self, outcome: Outcome) -> JobStatus {
        let status = {
            let mut lc = lock(&self.lifecycle);
            if lc.status.is_terminal() {
                return lc.status;
            }
            match outcome {
                Outcome::Done(path) => {
                    lc.status = JobStatus::Done;
                    lc.path = Some(path);
                }
                Outcome::Failed(message) => {
                    lc.status = JobStatus::Failed;
                    lc.error = Some(message);
                }
                Outcome::Cancelled => lc.status = JobStatus::Cancelled,
            }
            lc.finished_at = Some(SystemTime::now());
            lc.status
        };
        self.publish();
        status
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        let lc = lock(&self.lifecycle);
        JobSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            repo_id: self.source.repo_id.clone(),
            filename: self.source.filename.clone(),
            status: lc.status,
            created_at: unix_millis(self.created_at),
            started_at: lc.started_at.map(unix_millis),
            finished_at: lc.finished_at.map(unix_millis),
            error: lc.error.clone(),
            downloaded: self.downloaded(),
            size: self.size(),
            path: lc.path.clone(),
            cancel_requested: self.cancel_requested(),
        }
    }

    pub(crate) fn subscribe(&self) -> JobWatch {
        self.publish();
        self.watch.subscribe()
    }

    fn publish(&self) {
        self.watch.send_replace(self.snapshot());
    }

    /// Report byte progress to callbacks and, when someone is watching, to the fan-out.
    pub(crate) fn notify_progress(&self, observers: &Observers) {
        observers.progress(self.downloaded(), self.size().unwrap_or(0));
        if self.watch.receiver_count() > 0 {
            self.publish();
        }
    }

    pub(crate) fn notify_status(&self, observers: &Observers, status: JobStatus) {
        observers.status(status.as_str());
        self.publish();
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("source", &self.source)
            .field("status", &self.status())
            .finish()
    }
}
