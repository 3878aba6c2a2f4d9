pub mod config;
pub mod logging;
pub mod token;

mod claims;
pub mod job;
pub mod observe;
pub mod registry;
pub mod retry;
pub mod transfer;
mod worker;

pub use job::{JobId, JobSnapshot, JobStatus, Source};
pub use observe::{JobWatch, Observers};
pub use registry::{Registry, RegistryOptions};
