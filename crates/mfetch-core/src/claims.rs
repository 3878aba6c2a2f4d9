//! Destination claims: at most one job writes a given final path at a time.
//!
//! A worker claims its destination before the first attempt and holds the
//! guard until it has finalized the job. Dropping the guard releases the claim.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::job::Job;

/// Shared set of destination path -> owning job.
#[derive(Debug, Default)]
pub(crate) struct DestinationClaims {
    paths: Mutex<HashMap<PathBuf, Arc<Job>>>,
}

impl DestinationClaims {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn paths(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<Job>>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the job's final path. On conflict returns the current owner.
    pub(crate) fn claim(self: &Arc<Self>, job: &Arc<Job>) -> Result<ClaimGuard, Arc<Job>> {
        let path = job.final_path();
        let mut paths = self.paths();
        if let Some(owner) = paths.get(&path) {
            return Err(Arc::clone(owner));
        }
        paths.insert(path.clone(), Arc::clone(job));
        Ok(ClaimGuard {
            claims: Arc::clone(self),
            path,
        })
    }

    fn release(&self, path: &Path) {
        self.paths().remove(path);
    }
}

/// Held by a worker for the lifetime of its job.
#[derive(Debug)]
pub(crate) struct ClaimGuard {
    claims: Arc<DestinationClaims>,
    path: PathBuf,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.claims.release(&self.path);
    }
}
