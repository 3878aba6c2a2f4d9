//! `mfetch config` – show where settings come from and their effective values.

use anyhow::Result;
use mfetch_core::config::{self, MfetchConfig};
use mfetch_core::token;

pub fn run_config(cfg: &MfetchConfig) -> Result<()> {
    let retry = cfg.retry.clone().unwrap_or_default();
    let timeouts = cfg.timeouts.clone().unwrap_or_default();

    println!("config file:   {}", config::config_path()?.display());
    println!("model dir:     {}", cfg.resolved_model_dir()?.display());
    println!("endpoint:      {}", cfg.endpoint);
    println!("revision:      {}", cfg.revision);
    println!("chunk size:    {} bytes", cfg.chunk_size_bytes);
    println!("space margin:  {:.2}x", cfg.space_margin);
    println!(
        "retry:         {} attempts, {}s base delay, {}s max delay",
        retry.max_attempts, retry.base_delay_secs, retry.max_delay_secs
    );
    println!(
        "timeouts:      connect {}s, abort below {} B/s for {}s, total {}",
        timeouts.connect_secs,
        timeouts.low_speed_bytes,
        timeouts.low_speed_secs,
        if timeouts.total_secs == 0 {
            "unlimited".to_string()
        } else {
            format!("{}s", timeouts.total_secs)
        }
    );

    let token_source = if std::env::var(token::TOKEN_ENV).map_or(false, |t| !t.trim().is_empty()) {
        format!("${}", token::TOKEN_ENV)
    } else if token::read_token()?.is_some() {
        token::token_path()?.display().to_string()
    } else {
        "none".to_string()
    };
    println!("token:         {}", token_source);
    Ok(())
}
