//! CLI for the mfetch model downloader.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mfetch_core::config;
use std::path::PathBuf;

use commands::{run_config, run_login, run_partials, run_pull};

/// Top-level CLI for mfetch.
#[derive(Debug, Parser)]
#[command(name = "mfetch")]
#[command(about = "mfetch: resumable model artifact downloader", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one or more files from a model repository.
    Pull {
        /// Name shown for this download.
        name: String,
        /// Repository id, e.g. `TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF`.
        #[arg(long, value_name = "REPO_ID")]
        repo: String,
        /// File inside the repository; repeat or list several to fetch them concurrently.
        #[arg(long = "file", value_name = "FILE", required = true, num_args = 1..)]
        files: Vec<String>,
        /// Bearer token (defaults to $HF_TOKEN, then the stored login token).
        #[arg(long)]
        token: Option<String>,
        /// Destination directory (defaults to the configured model dir).
        #[arg(long, value_name = "DIR")]
        model_dir: Option<PathBuf>,
    },

    /// Store an access token for gated repositories.
    Login {
        token: String,
    },

    /// List partially downloaded files that a new pull would resume.
    Partials {
        #[arg(long, value_name = "DIR")]
        model_dir: Option<PathBuf>,
    },

    /// Show the config file location and effective settings.
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Pull {
                name,
                repo,
                files,
                token,
                model_dir,
            } => run_pull(&cfg, &name, &repo, &files, token, model_dir).await?,
            CliCommand::Login { token } => run_login(&token)?,
            CliCommand::Partials { model_dir } => run_partials(&cfg, model_dir)?,
            CliCommand::Config => run_config(&cfg)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
