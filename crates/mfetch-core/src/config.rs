use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Retry policy parameters (optional `[retry]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per job (including the first).
    pub max_attempts: u32,
    /// Delay in seconds before the second attempt; doubles for each later attempt.
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_secs: 1.0,
            max_delay_secs: 30,
        }
    }
}

/// Network timeouts (optional `[timeouts]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connect timeout in seconds.
    pub connect_secs: u64,
    /// Abort a transfer whose throughput stays below this many bytes/sec...
    pub low_speed_bytes: u32,
    /// ...for this many seconds.
    pub low_speed_secs: u64,
    /// Hard wall-clock ceiling per request in seconds; 0 disables it.
    pub total_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            low_speed_bytes: 1024,
            low_speed_secs: 60,
            total_secs: 0,
        }
    }
}

/// Global configuration loaded from `~/.config/mfetch/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfetchConfig {
    /// Destination directory for model files. Defaults to `~/.local/share/mfetch/models`.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
    /// Base URL of the artifact host.
    pub endpoint: String,
    /// Revision (branch, tag or commit) used when resolving fetch URLs.
    pub revision: String,
    /// Body chunk size requested from libcurl.
    pub chunk_size_bytes: usize,
    /// Required free space as a multiple of the remote size (1.2 = 20% headroom).
    pub space_margin: f64,
    /// Terminal jobs older than this are evicted by a periodic sweep.
    pub sweep_max_age_secs: u64,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Optional timeouts; if missing, built-in defaults are used.
    #[serde(default)]
    pub timeouts: Option<TimeoutConfig>,
}

impl Default for MfetchConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            endpoint: "https://huggingface.co".to_string(),
            revision: "main".to_string(),
            chunk_size_bytes: 64 * 1024,
            space_margin: 1.2,
            sweep_max_age_secs: 24 * 3600,
            retry: None,
            timeouts: None,
        }
    }
}

impl MfetchConfig {
    /// Model directory from the config, or the XDG data default.
    pub fn resolved_model_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.model_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("mfetch")?;
        Ok(xdg_dirs.get_data_home().join("models"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mfetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MfetchConfig> {
    let path = config_path()?;
    load_or_init_at(&path)
}

/// Same as [`load_or_init`] for an explicit path.
pub fn load_or_init_at(path: &Path) -> Result<MfetchConfig> {
    if !path.exists() {
        let default_cfg = MfetchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)
            .with_context(|| format!("failed to write default config {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let cfg: MfetchConfig =
        toml::from_str(&data).with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
