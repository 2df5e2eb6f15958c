//! Artifact uploads after a successful IaC run.

use super::JobProcessor;
use crate::driver::{IacDriver, PLAN_OUT_FILE};
use bytes::Bytes;
use std::path::Path;
use terrakube_core::model::{Job, JobType};
use tracing::warn;

impl JobProcessor {
    /// Persist the run's artifacts: state, plan, state projections, outputs
    /// and a history record. Each upload is independent; a failure loses
    /// that artifact but never the job.
    pub(crate) async fn upload_artifacts(&self, job: &mut Job, working_dir: &Path, exec_path: &Path) {
        self.upload_file(
            job,
            &working_dir.join("terraform.tfstate"),
            &job.state_key(),
        )
        .await;
        self.upload_file(job, &working_dir.join(PLAN_OUT_FILE), &job.plan_key())
            .await;

        if !matches!(
            job.job_type,
            JobType::TerraformApply | JobType::TerraformDestroy
        ) {
            return;
        }

        let driver = IacDriver::new(job, working_dir, exec_path);

        match driver.show_state().await {
            Ok(state_json) => {
                self.upload_text(job, &job.state_json_key(), state_json).await;
            }
            Err(e) => warn!(job_id = job.job_id, "failed to read state JSON: {e}"),
        }

        match driver.state_pull().await {
            Ok(raw_state) => {
                self.upload_text(job, &job.raw_state_key(), raw_state).await;
            }
            Err(e) => warn!(job_id = job.job_id, "failed to pull raw state: {e}"),
        }

        match driver.output().await {
            Ok(outputs) => job.terraform_output = outputs,
            Err(e) => warn!(job_id = job.job_id, "failed to read outputs: {e}"),
        }
        if !job.terraform_output.is_empty() {
            let outputs = job.terraform_output.clone();
            self.upload_text(job, &job.output_key(), outputs).await;
        }

        let state_url = job.state_json_key();
        if let Err(e) = self.status.create_history(job, &state_url).await {
            warn!(job_id = job.job_id, "failed to create history record: {e}");
        }
    }

    async fn upload_file(&self, job: &Job, local: &Path, key: &str) {
        let content = match std::fs::read(local) {
            Ok(content) => content,
            // Absent artifacts (no plan on destroy, no state on failure) are
            // simply skipped.
            Err(_) => return,
        };
        if let Err(e) = self.storage.upload(key, Bytes::from(content)).await {
            warn!(job_id = job.job_id, key, "failed to upload artifact: {e}");
        }
    }

    async fn upload_text(&self, job: &Job, key: &str, content: String) {
        if let Err(e) = self.storage.upload(key, Bytes::from(content)).await {
            warn!(job_id = job.job_id, key, "failed to upload artifact: {e}");
        }
    }
}
