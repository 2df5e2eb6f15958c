//! Shared model, configuration and error kinds for the Terrakube services.

pub mod config;
pub mod error;
pub mod model;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{Command, IacFlavor, Job, JobStatus, JobType, StepStatus};

/// Crate version, reported by the health endpoints.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
