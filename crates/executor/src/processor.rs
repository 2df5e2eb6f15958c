//! End-to-end job execution.

use crate::driver::{IacDriver, CLI_CONFIG_FILE, SAVED_PLAN_FILE};
use crate::scripts::{Phase, ScriptRunner};
use crate::status::StatusReporter;
use crate::version::VersionManager;
use crate::workspace::Workspace;
use crate::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use terrakube_core::model::{Job, JobType};
use terrakube_core::Config;
use terrakube_logs::{LogStream, RedisSink};
use terrakube_storage::StorageService;
use tracing::{info, warn};

/// Composes git, version management, scripts, the IaC driver, storage and
/// status reporting into the per-job pipeline.
pub struct JobProcessor {
    config: Config,
    status: StatusReporter,
    storage: Arc<dyn StorageService>,
    versions: VersionManager,
}

impl JobProcessor {
    pub fn new(config: Config, status: StatusReporter, storage: Arc<dyn StorageService>) -> Self {
        Self {
            config,
            status,
            storage,
            versions: VersionManager::new(),
        }
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.status
    }

    async fn open_stream(&self, job: &Job) -> LogStream {
        if self.config.redis_enabled {
            match RedisSink::connect(
                &self.config.redis_host,
                &self.config.redis_password,
                job.job_id.to_string(),
                job.step_id.clone(),
            )
            .await
            {
                Ok(sink) => return LogStream::new(Box::new(sink)),
                Err(e) => warn!(job_id = job.job_id, "redis log streaming unavailable: {e}"),
            }
        }
        LogStream::console()
    }

    /// Run one job to a terminal status. Errors are also reflected in the
    /// status reports; callers only use the result for logging.
    pub async fn process(&self, mut job: Job) -> Result<()> {
        info!(job_id = job.job_id, step_id = %job.step_id, job_type = job.job_type.as_str(), "processing job");

        if let Err(e) = self.status.set_running(&job).await {
            warn!(job_id = job.job_id, "failed to set running status: {e}");
        }

        let mut stream = self.open_stream(&job).await;
        let result = self.run(&mut job, &mut stream).await;
        if let Err(e) = stream.close().await {
            warn!(job_id = job.job_id, "failed to close log stream: {e}");
        }
        result
    }

    async fn run(&self, job: &mut Job, stream: &mut LogStream) -> Result<()> {
        let workspace = match Workspace::setup(job).await {
            Ok(workspace) => workspace,
            Err(e) => {
                let _ = self.status.set_completed(job, false, &e.to_string()).await;
                return Err(e);
            }
        };

        if !workspace.commit_id().is_empty() {
            job.commit_id = workspace.commit_id().to_string();
            if let Err(e) = self.status.update_commit_id(job, workspace.commit_id()).await {
                warn!(job_id = job.job_id, "failed to update commit id: {e}");
            }
        }

        self.download_state(job, workspace.working_dir()).await;
        if job.job_type == JobType::TerraformApply {
            self.download_saved_plan(job, workspace.working_dir()).await;
        }

        match job.job_type {
            JobType::TerraformPlan | JobType::TerraformApply | JobType::TerraformDestroy => {
                self.run_iac(job, workspace.working_dir(), stream).await
            }
            JobType::CustomScripts | JobType::Approval => {
                let runner = ScriptRunner::new(job, workspace.working_dir());
                let result = runner.execute_all(stream).await;
                match result {
                    Ok(()) => {
                        let output = stream.contents().to_string();
                        let _ = self.status.set_completed(job, true, &output).await;
                        Ok(())
                    }
                    Err(e) => {
                        let output = format!("{}\nError: {e}", stream.contents());
                        let _ = self.status.set_completed(job, false, &output).await;
                        Err(e)
                    }
                }
            }
            JobType::Unknown => {
                let e = Error::UnknownJobType("unknown".to_string());
                let _ = self.status.set_completed(job, false, &e.to_string()).await;
                Err(e)
            }
        }
        // `workspace` drops here and removes the checkout on every path.
    }

    async fn run_iac(&self, job: &mut Job, working_dir: &Path, stream: &mut LogStream) -> Result<()> {
        let exec_path = match self.versions.install(&job.iac_version, job.iac_flavor).await {
            Ok(path) => path,
            Err(e) => {
                let output = format!("{}\nError: {e}", stream.contents());
                let _ = self.status.set_completed(job, false, &output).await;
                return Err(e);
            }
        };

        self.write_backend_override(working_dir)?;
        self.write_cli_credentials(working_dir)?;

        let scripts = ScriptRunner::new(job, working_dir);
        if let Err(e) = scripts.execute_phase(Phase::BeforeInit, stream).await {
            let output = format!("{}\nError: {e}", stream.contents());
            let _ = self.status.set_completed(job, false, &output).await;
            return Err(e);
        }

        let driver = IacDriver::new(job, working_dir, &exec_path);
        let result = match driver.execute(stream).await {
            Ok(result) => result,
            Err(e) => {
                if let Err(script_err) = scripts.execute_phase(Phase::OnFailure, stream).await {
                    warn!(job_id = job.job_id, "onFailure scripts failed: {script_err}");
                }
                let output = format!("{}\nError: {e}", stream.contents());
                let _ = self.status.set_completed(job, false, &output).await;
                return Err(e);
            }
        };

        if let Err(e) = scripts.execute_phase(Phase::After, stream).await {
            warn!(job_id = job.job_id, "after scripts failed: {e}");
        }

        self.upload_artifacts(job, working_dir, &exec_path).await;

        let output = stream.contents().to_string();
        if job.job_type == JobType::TerraformPlan && result.exit_code == 2 {
            if let Err(e) = self.status.set_pending(job, &output).await {
                warn!(job_id = job.job_id, "failed to set pending status: {e}");
            }
        } else if let Err(e) = self.status.set_completed(job, true, &output).await {
            warn!(job_id = job.job_id, "failed to set completed status: {e}");
        }

        Ok(())
    }

    /// Prior state is optional; a missing object only means a fresh
    /// workspace.
    async fn download_state(&self, job: &Job, working_dir: &Path) {
        match self.storage.download(&job.state_key()).await {
            Ok(state) => {
                let local = working_dir.join("terraform.tfstate");
                if let Err(e) = std::fs::write(&local, &state) {
                    warn!(job_id = job.job_id, "failed to write state file: {e}");
                } else {
                    info!(job_id = job.job_id, "downloaded existing state");
                }
            }
            Err(e) if e.is_not_found() => {
                info!(job_id = job.job_id, "no existing state found");
            }
            Err(e) => warn!(job_id = job.job_id, "failed to download state: {e}"),
        }
    }

    /// A saved plan makes the apply replay exactly what was reviewed; a
    /// missing one degrades to a fresh apply.
    async fn download_saved_plan(&self, job: &Job, working_dir: &Path) {
        match self.storage.download(&job.plan_key()).await {
            Ok(plan) => {
                let local = working_dir.join(SAVED_PLAN_FILE);
                if let Err(e) = std::fs::write(&local, &plan) {
                    warn!(job_id = job.job_id, "failed to write plan file: {e}");
                } else {
                    info!(job_id = job.job_id, "downloaded saved plan");
                }
            }
            Err(e) if e.is_not_found() => {
                info!(job_id = job.job_id, "no saved plan found, will run fresh apply");
            }
            Err(e) => warn!(job_id = job.job_id, "failed to download saved plan: {e}"),
        }
    }

    /// Force the binary onto a local backend whose state file the executor
    /// owns.
    fn write_backend_override(&self, working_dir: &Path) -> Result<()> {
        let state_path = working_dir.join("terraform.tfstate");
        let content = format!(
            "terraform {{\n  backend \"local\" {{\n    path = \"{}\"\n  }}\n}}\n",
            state_path.display()
        );
        std::fs::write(working_dir.join("terrakube_override.tf"), content)?;
        Ok(())
    }

    /// Registry and API credentials for module/provider downloads during
    /// init. Written per job and selected via TF_CLI_CONFIG_FILE so
    /// concurrent jobs cannot race on a global file.
    fn write_cli_credentials(&self, working_dir: &Path) -> Result<()> {
        if self.config.internal_secret.is_empty() {
            return Ok(());
        }
        let token = match terrakube_auth::generate_internal_token(&self.config.internal_secret) {
            Ok(token) => token,
            Err(e) => {
                warn!("failed to mint registry credentials token: {e}");
                return Ok(());
            }
        };

        let mut content = String::new();
        let registry_host = host_of(&self.config.registry_domain);
        if !registry_host.is_empty() {
            content.push_str(&credentials_block(&registry_host, &token));
        }
        let api_host = host_of(&self.config.api_url);
        if !api_host.is_empty() && api_host != registry_host {
            content.push_str(&credentials_block(&api_host, &token));
        }

        if !content.is_empty() {
            std::fs::write(working_dir.join(CLI_CONFIG_FILE), content)?;
        }
        Ok(())
    }
}

fn credentials_block(host: &str, token: &str) -> String {
    format!("credentials \"{host}\" {{\n  token = \"{token}\"\n}}\n")
}

/// Hostname part of a URL or bare domain.
fn host_of(domain: &str) -> String {
    let stripped = domain
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    stripped
        .split(['/', ':'])
        .next()
        .unwrap_or_default()
        .to_string()
}

mod upload;
