//! `mfetch login` – store an access token.

use anyhow::{bail, Result};
use mfetch_core::token;

pub fn run_login(value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("token must not be empty");
    }
    let path = token::write_token(value)?;
    println!("Token saved to {}", path.display());
    Ok(())
}
