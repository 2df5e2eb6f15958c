//! Reporting executor progress back to the control plane.

use crate::Result;
use bytes::Bytes;
use std::sync::Arc;
use terrakube_client::ControlPlaneClient;
use terrakube_core::model::{Job, JobStatus, StepStatus};
use terrakube_storage::StorageService;
use tracing::warn;

/// Translates executor progress into control-plane API calls. Calls are
/// sequential per job; individual failures are logged and do not abort the
/// job.
pub struct StatusReporter {
    client: ControlPlaneClient,
    storage: Arc<dyn StorageService>,
}

impl StatusReporter {
    pub fn new(client: ControlPlaneClient, storage: Arc<dyn StorageService>) -> Self {
        Self { client, storage }
    }

    /// URL the UI polls for this step's log output.
    fn output_url(&self, job: &Job) -> String {
        format!(
            "{}/tfoutput/v1/organization/{}/job/{}/step/{}",
            self.client.api_url(),
            job.organization_id,
            job.job_id,
            job.step_id
        )
    }

    /// Upload the captured output and return the URL the step should link.
    async fn save_output(&self, job: &Job, output: &str) -> String {
        if let Err(e) = self
            .storage
            .upload(&job.output_key(), Bytes::from(output.to_string()))
            .await
        {
            warn!(job_id = job.job_id, "failed to upload log output: {e}");
        }
        self.output_url(job)
    }

    /// Step and job move to `running`; the step carries the output URL so
    /// the UI can start tailing.
    pub async fn set_running(&self, job: &Job) -> Result<()> {
        let output_url = self.output_url(job);
        if let Err(e) = self
            .client
            .update_step_status(
                &job.organization_id,
                job.job_id,
                &job.step_id,
                StepStatus::Running.as_str(),
                &output_url,
            )
            .await
        {
            warn!(job_id = job.job_id, "failed to update step to running: {e}");
        }
        self.client
            .update_job_status(
                &job.organization_id,
                job.job_id,
                JobStatus::Running.as_str(),
            )
            .await?;
        Ok(())
    }

    /// Terminal transition, uploading the captured output first.
    pub async fn set_completed(&self, job: &Job, success: bool, output: &str) -> Result<()> {
        let output_url = self.save_output(job, output).await;
        let status = if success {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };

        self.client
            .update_step_status(
                &job.organization_id,
                job.job_id,
                &job.step_id,
                status.as_str(),
                &output_url,
            )
            .await?;
        self.client
            .update_job_status(&job.organization_id, job.job_id, status.as_str())
            .await?;
        Ok(())
    }

    /// Plan finished with changes: the step goes back to pending awaiting an
    /// apply.
    pub async fn set_pending(&self, job: &Job, output: &str) -> Result<()> {
        let output_url = self.save_output(job, output).await;
        self.client
            .update_step_status(
                &job.organization_id,
                job.job_id,
                &job.step_id,
                StepStatus::Pending.as_str(),
                &output_url,
            )
            .await?;
        self.client
            .update_job_status(
                &job.organization_id,
                job.job_id,
                JobStatus::Pending.as_str(),
            )
            .await?;
        Ok(())
    }

    pub async fn update_commit_id(&self, job: &Job, commit_id: &str) -> Result<()> {
        self.client
            .update_job_commit_id(&job.organization_id, job.job_id, commit_id)
            .await?;
        Ok(())
    }

    pub async fn create_history(&self, job: &Job, state_url: &str) -> Result<()> {
        self.client
            .create_history(
                &job.organization_id,
                &job.workspace_id,
                job.job_id,
                state_url,
            )
            .await?;
        Ok(())
    }
}
