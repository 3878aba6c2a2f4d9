//! `mfetch pull` – download files from a model repository.

use anyhow::{bail, Result};
use mfetch_core::config::MfetchConfig;
use mfetch_core::{token, JobId, JobStatus, Observers, Registry, RegistryOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Event forwarded from a job's worker thread to the renderer.
#[derive(Debug)]
enum Tick {
    Progress { slot: usize, done: u64, total: u64 },
    Status { slot: usize, status: String },
}

pub async fn run_pull(
    cfg: &MfetchConfig,
    name: &str,
    repo: &str,
    files: &[String],
    token: Option<String>,
    model_dir: Option<PathBuf>,
) -> Result<()> {
    let mut opts = RegistryOptions::from_config(cfg)?;
    if let Some(dir) = model_dir {
        opts.model_dir = dir;
    }
    let token = token::resolve_token(token)?;
    let registry = Arc::new(Registry::new(opts)?);
    println!(
        "Pulling {} file(s) of {} from {} into {}",
        files.len(),
        name,
        repo,
        registry.model_dir().display()
    );

    let (tx, rx) = mpsc::channel::<Tick>(64);
    let mut ids: Vec<JobId> = Vec::with_capacity(files.len());
    for (slot, file) in files.iter().enumerate() {
        let progress_tx = tx.clone();
        let status_tx = tx.clone();
        let observers = Observers::new()
            .on_progress(move |done, total| {
                // Dropped ticks only thin out the display.
                let _ = progress_tx.try_send(Tick::Progress { slot, done, total });
            })
            .on_status(move |status| {
                let _ = status_tx.blocking_send(Tick::Status {
                    slot,
                    status: status.to_string(),
                });
            });
        let id = registry.download(name, repo, file, token.clone(), observers);
        tracing::debug!(job_id = %id, file = %file, "pull job started");
        ids.push(id);
    }
    drop(tx);

    let render = tokio::spawn(render(rx, files.to_vec()));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    loop {
        let pending = ids
            .iter()
            .filter_map(|id| registry.get(id))
            .any(|s| !s.is_terminal());
        if !pending {
            break;
        }
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!("Interrupted, cancelling downloads (partial files are kept)...");
                for id in &ids {
                    registry.cancel(id);
                }
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }

    // Workers keep their callbacks until the registry drops; stop rendering here.
    render.abort();
    let _ = render.await;

    let mut failed = 0usize;
    for (file, id) in files.iter().zip(&ids) {
        let Some(snap) = registry.get(id) else {
            continue;
        };
        match snap.status {
            JobStatus::Done => {
                let path = snap
                    .path
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                println!("  {:<40} done  {}", file, path);
            }
            JobStatus::Failed => {
                failed += 1;
                println!(
                    "  {:<40} failed: {}",
                    file,
                    snap.error.as_deref().unwrap_or("unknown error")
                );
            }
            other => println!("  {:<40} {} (run pull again to resume)", file, other),
        }
    }

    if failed > 0 {
        bail!("{} of {} download(s) failed", failed, files.len());
    }
    if interrupted {
        bail!("interrupted");
    }
    Ok(())
}

async fn render(mut rx: mpsc::Receiver<Tick>, labels: Vec<String>) {
    let started = Instant::now();
    let mut last_print: Vec<Option<Instant>> = vec![None; labels.len()];
    let mut baseline: Vec<Option<u64>> = vec![None; labels.len()];
    while let Some(tick) = rx.recv().await {
        match tick {
            Tick::Progress { slot, done, total } => {
                let first = *baseline[slot].get_or_insert(done);
                let now = Instant::now();
                let due = last_print[slot]
                    .map_or(true, |t| now.duration_since(t) >= PROGRESS_INTERVAL)
                    || (total > 0 && done >= total);
                if !due {
                    continue;
                }
                last_print[slot] = Some(now);
                println!(
                    "{}",
                    progress_line(
                        &labels[slot],
                        done,
                        total,
                        done.saturating_sub(first),
                        started.elapsed()
                    )
                );
            }
            Tick::Status { slot, status } => {
                if status == "running" {
                    println!("  {}: started", labels[slot]);
                }
            }
        }
    }
}

/// One progress line: sizes in MiB, rate from bytes moved this session.
fn progress_line(label: &str, done: u64, total: u64, moved: u64, elapsed: Duration) -> String {
    let done_mib = done as f64 / 1_048_576.0;
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { moved as f64 / secs } else { 0.0 };
    let rate_mib = rate / 1_048_576.0;
    if total == 0 {
        return format!("  {}: {:.1} MiB  {:.2} MiB/s", label, done_mib, rate_mib);
    }
    let total_mib = total as f64 / 1_048_576.0;
    let pct = (done as f64 / total as f64 * 100.0).min(100.0);
    let eta = if rate > 0.0 {
        format!("{:.0}s", total.saturating_sub(done) as f64 / rate)
    } else {
        "?".to_string()
    };
    format!(
        "  {}: {:.1} / {:.1} MiB ({:.1}%)  {:.2} MiB/s  ETA {}",
        label, done_mib, total_mib, pct, rate_mib, eta
    )
}
