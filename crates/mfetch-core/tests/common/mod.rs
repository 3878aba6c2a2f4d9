#![allow(dead_code)]

pub mod range_server;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mfetch_core::retry::RetryPolicy;
use mfetch_core::{JobSnapshot, Observers, Registry, RegistryOptions};

pub const REPO: &str = "org/tiny-GGUF";

/// Deterministic test payload.
pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Backoff of 50, 100, 200 ms over four attempts.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_secs(1),
    }
}

pub fn options(dir: &Path, url: &str) -> RegistryOptions {
    let mut opts = RegistryOptions::new(dir).with_endpoint(url);
    opts.retry = fast_retry();
    opts.transfer.connect_timeout = Duration::from_secs(5);
    opts.transfer.probe_timeout = Duration::from_secs(5);
    opts
}

pub fn registry(dir: &Path, url: &str) -> Registry {
    Registry::new(options(dir, url)).unwrap()
}

/// Poll until the job is terminal.
pub fn wait_terminal(reg: &Registry, id: &str) -> JobSnapshot {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let snap = reg.get(id).expect("job exists");
        if snap.is_terminal() {
            return snap;
        }
        assert!(Instant::now() < deadline, "job {} did not finish", id);
        thread::sleep(Duration::from_millis(20));
    }
}

/// Poll until `cond` holds.
pub fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(10));
    }
}

/// Callbacks that record every progress value and status string.
#[derive(Clone, Default)]
pub struct Recorder {
    pub progress: Arc<Mutex<Vec<(u64, u64)>>>,
    pub statuses: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn observers(&self) -> Observers {
        let progress = Arc::clone(&self.progress);
        let statuses = Arc::clone(&self.statuses);
        Observers::new()
            .on_progress(move |done, total| progress.lock().unwrap().push((done, total)))
            .on_status(move |s| statuses.lock().unwrap().push(s.to_string()))
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn downloaded(&self) -> Vec<u64> {
        self.progress.lock().unwrap().iter().map(|p| p.0).collect()
    }

    /// Wait for the worker's final status callback.
    pub fn wait_finished(&self) {
        wait_until(|| self.statuses.lock().unwrap().len() >= 2);
    }
}

pub fn assert_non_decreasing(values: &[u64]) {
    for w in values.windows(2) {
        assert!(w[0] <= w[1], "progress went backwards: {} -> {}", w[0], w[1]);
    }
}
