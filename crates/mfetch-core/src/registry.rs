//! Job registry: create, start, observe, cancel and evict download jobs.
//!
//! The registry owns every job record in memory. One mutex guards the job
//! map and is held only for map reads and writes; workers run on their own
//! threads and never take it.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, SystemTime};
use url::Url;

use crate::claims::DestinationClaims;
use crate::config::MfetchConfig;
use crate::job::{Job, JobId, JobSnapshot, JobStatus, Outcome, Source};
use crate::observe::{JobWatch, Observers};
use crate::retry::RetryPolicy;
use crate::transfer::space::FreeSpace;
use crate::transfer::{TransferEngine, TransferOptions};
use crate::worker;

const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
const DEFAULT_REVISION: &str = "main";

/// Runtime options for a [`Registry`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Destination directory for every job of this registry.
    pub model_dir: PathBuf,
    /// Base URL of the artifact host.
    pub endpoint: String,
    pub revision: String,
    pub retry: RetryPolicy,
    pub transfer: TransferOptions,
    /// Age after which [`Registry::sweep_expired`] evicts finished jobs.
    pub sweep_max_age: Duration,
}

impl RegistryOptions {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            revision: DEFAULT_REVISION.to_string(),
            retry: RetryPolicy::default(),
            transfer: TransferOptions::default(),
            sweep_max_age: Duration::from_secs(24 * 3600),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn from_config(cfg: &MfetchConfig) -> Result<Self> {
        Ok(Self {
            model_dir: cfg.resolved_model_dir()?,
            endpoint: cfg.endpoint.clone(),
            revision: cfg.revision.clone(),
            retry: cfg
                .retry
                .as_ref()
                .map(RetryPolicy::from)
                .unwrap_or_default(),
            transfer: TransferOptions::from(cfg),
            sweep_max_age: Duration::from_secs(cfg.sweep_max_age_secs),
        })
    }
}

/// Thread-safe collection of download jobs. Share it behind an `Arc`.
pub struct Registry {
    jobs: Mutex<HashMap<JobId, Arc<Job>>>,
    engine: Arc<TransferEngine>,
    policy: RetryPolicy,
    model_dir: PathBuf,
    sweep_max_age: Duration,
    claims: Arc<DestinationClaims>,
}

impl Registry {
    /// Build a registry, creating the model directory if needed.
    pub fn new(opts: RegistryOptions) -> Result<Self> {
        fs::create_dir_all(&opts.model_dir).with_context(|| {
            format!("failed to create model dir {}", opts.model_dir.display())
        })?;
        let endpoint = Url::parse(&opts.endpoint)
            .with_context(|| format!("invalid endpoint {}", opts.endpoint))?;
        let engine = TransferEngine::new(endpoint, opts.revision, opts.transfer);
        Ok(Self {
            jobs: Mutex::new(HashMap::new()),
            engine: Arc::new(engine),
            policy: opts.retry,
            model_dir: opts.model_dir,
            sweep_max_age: opts.sweep_max_age,
            claims: Arc::new(DestinationClaims::new()),
        })
    }

    /// Replace the free-space source used by the disk preflight.
    pub fn with_free_space(mut self, space: Arc<dyn FreeSpace>) -> Self {
        let engine = self.engine.as_ref().clone().with_free_space(space);
        self.engine = Arc::new(engine);
        self
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, Arc<Job>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn job(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs().get(id).cloned()
    }

    /// Register a new queued job and return its id.
    pub fn create(
        &self,
        name: &str,
        repo_id: &str,
        filename: &str,
        token: Option<String>,
    ) -> JobId {
        let job = Job::new(
            name.to_string(),
            Source::new(repo_id, filename),
            self.model_dir.clone(),
            token,
        );
        let id = job.id().to_string();
        tracing::debug!(job_id = %id, repo = repo_id, file = filename, "job {} queued", name);
        self.jobs().insert(id.clone(), Arc::new(job));
        id
    }

    pub fn get(&self, id: &str) -> Option<JobSnapshot> {
        self.job(id).map(|j| j.snapshot())
    }

    /// Every job, oldest first.
    pub fn list_all(&self) -> Vec<JobSnapshot> {
        self.snapshots(|_| true)
    }

    /// Queued and running jobs, oldest first.
    pub fn list_active(&self) -> Vec<JobSnapshot> {
        self.snapshots(|s| s.is_active())
    }

    fn snapshots(&self, keep: impl Fn(JobStatus) -> bool) -> Vec<JobSnapshot> {
        let mut jobs: Vec<Arc<Job>> = self.jobs().values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at());
        jobs.iter()
            .map(|j| j.snapshot())
            .filter(|s| keep(s.status))
            .collect()
    }

    /// Attach callbacks. Only allowed before the job starts.
    pub fn observe(&self, id: &str, observers: Observers) -> bool {
        self.job(id).map_or(false, |j| j.attach(observers))
    }

    /// Move a queued job to running and spawn its worker thread.
    pub fn start(&self, id: &str) -> bool {
        let Some(job) = self.job(id) else {
            return false;
        };
        if !job.begin() {
            return false;
        }
        let engine = Arc::clone(&self.engine);
        let claims = Arc::clone(&self.claims);
        let policy = self.policy;
        let worker_job = Arc::clone(&job);
        let short: String = id.chars().take(8).collect();
        let spawned = thread::Builder::new()
            .name(format!("mfetch-job-{}", short))
            .spawn(move || worker::run(worker_job, engine, policy, claims));
        if let Err(e) = spawned {
            tracing::error!(job_id = id, "failed to spawn worker: {}", e);
            job.finish(Outcome::Failed(format!("failed to spawn worker: {}", e)));
        }
        true
    }

    /// Request cancellation. A queued or running job is marked cancelled at
    /// once; a running worker stops at its next chunk or backoff tick.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(job) = self.job(id) else {
            return false;
        };
        let cancelled = job.request_cancel();
        if cancelled {
            tracing::info!(job_id = id, "cancel requested for job {}", job.name());
        }
        cancelled
    }

    /// Evict a terminal job.
    pub fn remove(&self, id: &str) -> bool {
        let mut jobs = self.jobs();
        match jobs.get(id) {
            Some(job) if job.status().is_terminal() => {
                jobs.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Evict terminal jobs that finished more than `max_age` ago.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();
        let mut jobs = self.jobs();
        let before = jobs.len();
        jobs.retain(|_, job| {
            let expired = job.status().is_terminal()
                && job
                    .finished_at()
                    .and_then(|t| now.duration_since(t).ok())
                    .map_or(false, |age| age > max_age);
            !expired
        });
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(removed, "swept finished jobs");
        }
        removed
    }

    /// [`Registry::sweep`] with the configured maximum age.
    pub fn sweep_expired(&self) -> usize {
        self.sweep(self.sweep_max_age)
    }

    /// Create, observe and start in one call.
    pub fn download(
        &self,
        name: &str,
        repo_id: &str,
        filename: &str,
        token: Option<String>,
        observers: Observers,
    ) -> JobId {
        let id = self.create(name, repo_id, filename, token);
        if !observers.is_empty() {
            self.observe(&id, observers);
        }
        self.start(&id);
        id
    }

    /// Start a fresh job for the same artifact as a failed or cancelled one.
    /// The new job resumes from whatever staging file the old one left.
    pub fn retry(&self, id: &str) -> Option<JobId> {
        let old = self.job(id)?;
        if !matches!(old.status(), JobStatus::Failed | JobStatus::Cancelled) {
            return None;
        }
        let source = old.source();
        let new_id = self.create(
            old.name(),
            &source.repo_id,
            &source.filename,
            old.token().map(str::to_string),
        );
        tracing::info!(job_id = %new_id, previous = id, "retrying job {}", old.name());
        self.start(&new_id);
        Some(new_id)
    }

    /// Subscribe to snapshots of one job.
    pub fn watch(&self, id: &str) -> Option<JobWatch> {
        self.job(id).map(|j| j.subscribe())
    }
}
