//! Bearer token lookup for authenticated fetches.
//!
//! Resolution order: explicit value, `HF_TOKEN` env var, then the token file
//! under the XDG config dir (written by `mfetch login`).

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable consulted when no explicit token is given.
pub const TOKEN_ENV: &str = "HF_TOKEN";

pub fn token_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mfetch")?;
    Ok(xdg_dirs.get_config_home().join("token"))
}

/// Read a token file. Missing or blank files yield `None`.
pub fn read_token_at(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => {
            let t = s.trim();
            Ok((!t.is_empty()).then(|| t.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read token file {}", path.display())),
    }
}

/// Store a token, owner-readable only on Unix.
pub fn write_token_at(path: &Path, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", token.trim()))
        .with_context(|| format!("failed to write token file {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Token stored by `mfetch login`, if any.
pub fn read_token() -> Result<Option<String>> {
    read_token_at(&token_path()?)
}

pub fn write_token(token: &str) -> Result<PathBuf> {
    let path = token_path()?;
    write_token_at(&path, token)?;
    Ok(path)
}

/// Pick the token to use for a job: explicit, then env, then token file.
pub fn resolve_token(explicit: Option<String>) -> Result<Option<String>> {
    if let Some(t) = explicit.filter(|t| !t.trim().is_empty()) {
        return Ok(Some(t));
    }
    if let Ok(t) = std::env::var(TOKEN_ENV) {
        if !t.trim().is_empty() {
            return Ok(Some(t.trim().to_string()));
        }
    }
    read_token()
}
