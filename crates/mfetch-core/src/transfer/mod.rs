//! Transfer engine: one attempt of one job.
//!
//! Resolves the fetch URL, probes the remote size, preflights disk space,
//! resumes `<file>.part` with a byte-range GET, streams the body into it, and
//! renames it over the final name once the response is fully consumed.
//! Cancellation is checked before every body chunk and from libcurl's
//! progress hook, so a stalled stream also notices it.

pub mod probe;
pub mod resolve;
pub mod space;
pub mod staging;

use std::cell::{Cell, RefCell};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::MfetchConfig;
use crate::job::Job;
use crate::observe::Observers;
use crate::retry::TransferError;

use space::{FreeSpace, VolumeSpace};
use staging::StagingWriter;

/// Tunables for a single attempt.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Body chunk size requested from libcurl (cancel granularity).
    pub chunk_size: usize,
    /// Required free space as a multiple of the remote size.
    pub space_margin: f64,
    pub connect_timeout: Duration,
    /// Ceiling for the HEAD probe.
    pub probe_timeout: Duration,
    /// Abort a GET whose throughput stays below `low_speed_limit` bytes/sec for `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    /// Hard ceiling per GET; `None` lets multi-gigabyte transfers run as long as they make progress.
    pub total_timeout: Option<Duration>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            space_margin: 1.2,
            connect_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            total_timeout: None,
        }
    }
}

impl From<&MfetchConfig> for TransferOptions {
    fn from(cfg: &MfetchConfig) -> Self {
        let timeouts = cfg.timeouts.clone().unwrap_or_default();
        Self {
            chunk_size: cfg.chunk_size_bytes.max(1024),
            space_margin: cfg.space_margin,
            connect_timeout: Duration::from_secs(timeouts.connect_secs),
            low_speed_limit: timeouts.low_speed_bytes,
            low_speed_time: Duration::from_secs(timeouts.low_speed_secs),
            total_timeout: (timeouts.total_secs > 0).then(|| Duration::from_secs(timeouts.total_secs)),
            ..Self::default()
        }
    }
}

/// Result of an attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Final file committed at this path.
    Completed(PathBuf),
    /// Cancel flag observed; not an error and not retried.
    Cancelled,
}

/// How the body stream ended.
enum StreamEnd {
    Complete,
    Cancelled,
    /// 416 on a resumed request: the staging file is at or past the end.
    RangeNotSatisfiable,
}

/// Performs attempts; shared by all job workers of a registry.
#[derive(Clone)]
pub struct TransferEngine {
    endpoint: Url,
    revision: String,
    options: TransferOptions,
    space: Arc<dyn FreeSpace>,
}

impl TransferEngine {
    pub fn new(endpoint: Url, revision: impl Into<String>, options: TransferOptions) -> Self {
        Self {
            endpoint,
            revision: revision.into(),
            options,
            space: Arc::new(VolumeSpace),
        }
    }

    /// Replace the free-space source (tests, quota-aware callers).
    pub fn with_free_space(mut self, space: Arc<dyn FreeSpace>) -> Self {
        self.space = space;
        self
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Run one attempt for `job`.
    pub(crate) fn attempt(
        &self,
        job: &Job,
        observers: &Observers,
    ) -> Result<AttemptOutcome, TransferError> {
        let url = resolve::resolve_url(&self.endpoint, &self.revision, job.source())?;
        let headers = auth_headers(job.token());
        let final_path = job.final_path();
        let staging_path = job.staging_path();
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let head = match probe::probe(url.as_str(), &headers, &self.options) {
            Ok(head) => Some(head),
            Err(e) => {
                tracing::debug!(job_id = job.id(), "size probe failed, skipping disk-space preflight: {}", e);
                None
            }
        };
        let remote_size = head.as_ref().and_then(|h| h.size());
        if let Some(size) = remote_size {
            job.set_size(size);
        }

        if let Some(len) = complete_file_len(&final_path, remote_size)? {
            tracing::info!(job_id = job.id(), path = %final_path.display(), "final file already present");
            job.set_size(len);
            job.record_progress(len);
            job.notify_progress(observers);
            return Ok(AttemptOutcome::Completed(final_path));
        }

        if let Some(size) = remote_size {
            space::check(self.space.as_ref(), job.dest_dir(), size, self.options.space_margin)?;
        }

        let resume_from = staging::resume_offset(&staging_path)?;
        if resume_from > 0 {
            tracing::debug!(job_id = job.id(), resume_from, "resuming staging file");
            if head.as_ref().map_or(false, |h| !h.accept_ranges) {
                tracing::warn!(
                    job_id = job.id(),
                    resume_from,
                    "server does not advertise byte ranges; the resume may restart from zero"
                );
            }
            job.record_progress(resume_from);
            job.notify_progress(observers);
        }

        match self.stream(job, observers, url.as_str(), &headers, &staging_path, resume_from)? {
            StreamEnd::Complete => {}
            StreamEnd::Cancelled => return Ok(AttemptOutcome::Cancelled),
            StreamEnd::RangeNotSatisfiable => {
                if remote_size != Some(resume_from) {
                    tracing::warn!(
                        job_id = job.id(),
                        resume_from,
                        ?remote_size,
                        "staging file does not match remote size; discarding it"
                    );
                    staging::discard(&staging_path)?;
                    return Err(TransferError::Http(416));
                }
                tracing::debug!(job_id = job.id(), "staging file already holds the whole artifact");
            }
        }

        if job.cancel_requested() {
            return Ok(AttemptOutcome::Cancelled);
        }

        let len = staging::commit(&staging_path, &final_path)?;
        job.set_size(len);
        job.record_progress(len);
        job.notify_progress(observers);
        Ok(AttemptOutcome::Completed(final_path))
    }

    /// GET (ranged when `resume_from > 0`) and append the body to the staging file.
    fn stream(
        &self,
        job: &Job,
        observers: &Observers,
        url: &str,
        headers: &[String],
        staging_path: &Path,
        resume_from: u64,
    ) -> Result<StreamEnd, TransferError> {
        let status = Cell::new(0u32);
        let content_length: Cell<Option<u64>> = Cell::new(None);
        let cancelled = Cell::new(false);
        let write_error: RefCell<Option<io::Error>> = RefCell::new(None);
        let writer: RefCell<Option<StagingWriter>> = RefCell::new(None);

        let mut easy = curl::easy::Easy::new();
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.buffer_size(self.options.chunk_size)?;
        easy.connect_timeout(self.options.connect_timeout)?;
        easy.low_speed_limit(self.options.low_speed_limit)?;
        easy.low_speed_time(self.options.low_speed_time)?;
        if let Some(t) = self.options.total_timeout {
            easy.timeout(t)?;
        }
        easy.progress(true)?;
        if resume_from > 0 {
            easy.range(&format!("{}-", resume_from))?;
        }
        if !headers.is_empty() {
            easy.http_headers(header_list(headers)?)?;
        }

        let performed = {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                if let Ok(line) = str::from_utf8(data) {
                    record_header(line.trim_end(), &status, &content_length);
                }
                true
            })?;
            transfer.write_function(|data| {
                if job.cancel_requested() {
                    cancelled.set(true);
                    return Ok(0);
                }
                let code = status.get();
                if code != 200 && code != 206 {
                    // Error body; the status is reported after perform.
                    return Ok(data.len());
                }
                let mut slot = writer.borrow_mut();
                if slot.is_none() {
                    let append = code == 206 && resume_from > 0;
                    if !append && resume_from > 0 {
                        tracing::warn!(job_id = job.id(), "server ignored range request; restarting staging file");
                    }
                    match StagingWriter::open(staging_path, append) {
                        Ok(w) => {
                            if let Some(len) = content_length.get() {
                                job.set_size(if append { resume_from + len } else { len });
                            }
                            *slot = Some(w);
                        }
                        Err(e) => {
                            *write_error.borrow_mut() = Some(e);
                            return Ok(0);
                        }
                    }
                }
                let Some(w) = slot.as_mut() else {
                    return Ok(0);
                };
                if let Err(e) = w.append(data) {
                    *write_error.borrow_mut() = Some(e);
                    return Ok(0);
                }
                job.record_progress(w.len());
                job.notify_progress(observers);
                Ok(data.len())
            })?;
            transfer.progress_function(|_, _, _, _| !job.cancel_requested())?;
            transfer.perform()
        };

        let writer = writer.into_inner();
        if let Err(e) = performed {
            if cancelled.get() || (e.is_aborted_by_callback() && job.cancel_requested()) {
                return Ok(StreamEnd::Cancelled);
            }
            if e.is_write_error() {
                if let Some(io_err) = write_error.into_inner() {
                    return Err(TransferError::Io(io_err));
                }
            }
            return Err(TransferError::Curl(e));
        }

        let code = easy.response_code()?;
        match code {
            200 | 206 => {}
            416 if resume_from > 0 => return Ok(StreamEnd::RangeNotSatisfiable),
            _ => return Err(TransferError::Http(code)),
        }
        if job.cancel_requested() {
            return Ok(StreamEnd::Cancelled);
        }

        match writer {
            Some(w) => w.sync()?,
            None => {
                // Empty body: the staging file must still exist for the commit.
                let w = StagingWriter::open(staging_path, code == 206)?;
                w.sync()?;
            }
        }
        Ok(StreamEnd::Complete)
    }
}

/// Length of an already committed final file whose length equals the probed
/// remote size. Without a probed size nothing counts as complete.
fn complete_file_len(final_path: &Path, remote_size: Option<u64>) -> io::Result<Option<u64>> {
    let Some(expected) = remote_size else {
        return Ok(None);
    };
    match fs::metadata(final_path) {
        Ok(m) if m.is_file() => {
            let len = m.len();
            Ok((len == expected).then_some(len))
        }
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Track the status code and `Content-Length` of the response being received.
fn record_header(line: &str, status: &Cell<u32>, content_length: &Cell<Option<u64>>) {
    if line.starts_with("HTTP/") {
        let code = line
            .split_whitespace()
            .nth(1)
            .and_then(|c| c.parse::<u32>().ok())
            .unwrap_or(0);
        status.set(code);
        content_length.set(None);
        return;
    }
    if let Some((name, value)) = line.split_once(':') {
        if name.trim().eq_ignore_ascii_case("content-length") {
            content_length.set(value.trim().parse::<u64>().ok());
        }
    }
}

fn auth_headers(token: Option<&str>) -> Vec<String> {
    token
        .map(|t| vec![format!("Authorization: Bearer {}", t.trim())])
        .unwrap_or_default()
}

/// Build a curl header list from "Name: value" lines.
pub(crate) fn header_list(headers: &[String]) -> Result<curl::easy::List, curl::Error> {
    let mut list = curl::easy::List::new();
    for h in headers {
        list.append(h)?;
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_header_tracks_last_response() {
        let status = Cell::new(0);
        let len = Cell::new(None);
        record_header("HTTP/1.1 302 Found", &status, &len);
        record_header("Content-Length: 10", &status, &len);
        assert_eq!((status.get(), len.get()), (302, Some(10)));
        record_header("HTTP/2 206", &status, &len);
        assert_eq!((status.get(), len.get()), (206, None));
        record_header("content-length: 4096", &status, &len);
        assert_eq!(len.get(), Some(4096));
    }

    #[test]
    fn auth_header_only_with_token() {
        assert!(auth_headers(None).is_empty());
        assert_eq!(auth_headers(Some(" hf_x ")), vec!["Authorization: Bearer hf_x".to_string()]);
    }

    #[test]
    fn complete_file_len_matches_size() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("m.gguf");
        assert_eq!(complete_file_len(&p, Some(3)).unwrap(), None);
        fs::write(&p, b"abc").unwrap();
        assert_eq!(complete_file_len(&p, Some(3)).unwrap(), Some(3));
        assert_eq!(complete_file_len(&p, Some(4)).unwrap(), None);
        assert_eq!(complete_file_len(&p, None).unwrap(), None);
        assert_eq!(complete_file_len(dir.path(), Some(0)).unwrap(), None);
    }

    #[test]
    fn options_from_config() {
        let mut cfg = MfetchConfig::default();
        cfg.chunk_size_bytes = 10;
        let o = TransferOptions::from(&cfg);
        assert_eq!(o.chunk_size, 1024);
        assert_eq!(o.total_timeout, None);
        assert_eq!(o.connect_timeout, Duration::from_secs(30));
    }
}
