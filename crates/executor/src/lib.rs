//! Job execution service.
//!
//! Materializes control-plane jobs into subprocess invocations of the IaC
//! binary: clone the source, install the requested binary version, override
//! the backend, run lifecycle scripts around the command, stream output,
//! upload artifacts and report terminal status.

pub mod driver;
pub mod error;
pub mod mode;
pub mod process;
pub mod processor;
pub mod scripts;
pub mod status;
pub mod version;
pub mod workspace;

pub use error::{Error, Result};
pub use processor::JobProcessor;
pub use status::StatusReporter;
pub use version::VersionManager;

use std::sync::Arc;
use terrakube_client::ControlPlaneClient;
use terrakube_core::config::ExecutorMode;
use terrakube_core::Config;
use tracing::info;

/// Start the executor service in the mode selected by configuration.
pub async fn start(config: Config) -> Result<()> {
    info!("executor service starting");

    let storage = terrakube_storage::from_config(&config).await?;
    let client = ControlPlaneClient::new(config.api_url.clone(), config.internal_secret.clone());
    let status = StatusReporter::new(client, storage.clone());
    let port = config.port.clone();
    let mode = config.executor_mode;
    let ephemeral_job = config.ephemeral_job.clone();
    let processor = Arc::new(JobProcessor::new(config, status, storage));

    match mode {
        ExecutorMode::Batch => {
            let job = ephemeral_job.expect("batch mode validated at config load");
            mode::batch::run(job, processor).await;
            Ok(())
        }
        ExecutorMode::Online => mode::online::serve(&port, processor).await,
    }
}
