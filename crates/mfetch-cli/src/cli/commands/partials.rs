//! `mfetch partials` – list resumable staging files.

use anyhow::{Context, Result};
use mfetch_core::config::MfetchConfig;
use mfetch_core::transfer::staging;
use std::path::PathBuf;

pub fn run_partials(cfg: &MfetchConfig, model_dir: Option<PathBuf>) -> Result<()> {
    let dir = match model_dir {
        Some(dir) => dir,
        None => cfg.resolved_model_dir()?,
    };
    let partials = staging::list_partials(&dir)
        .with_context(|| format!("failed to list {}", dir.display()))?;
    if partials.is_empty() {
        println!("No partial downloads in {}.", dir.display());
        return Ok(());
    }
    println!("{:<12} {}", "BYTES", "FILE");
    for p in partials {
        println!("{:<12} {}", p.bytes, p.filename);
    }
    Ok(())
}
