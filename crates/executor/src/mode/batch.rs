//! Batch mode: run the inlined job once and exit.

use crate::processor::JobProcessor;
use std::sync::Arc;
use terrakube_core::model::Job;
use tracing::{error, info};

/// Execute the ephemeral job. The terminal status is already reported by the
/// processor, so a failure does not bubble into the process exit code —
/// a non-zero exit would only make the orchestrator retry a job that the
/// control plane has marked failed.
pub async fn run(job: Job, processor: Arc<JobProcessor>) {
    info!(job_id = job.job_id, "starting batch execution");
    if let Err(e) = processor.process(job).await {
        error!("job execution failed: {e}");
    }
    info!("batch execution finished");
}
