//! CLI command handlers, one per file.

mod config;
mod login;
mod partials;
mod pull;

pub use config::run_config;
pub use login::run_login;
pub use partials::run_partials;
pub use pull::run_pull;
