//! Control-plane job scheduler.
//!
//! Polls the job table on a fixed interval, promotes `pending` jobs into the
//! queue, resolves the execution context for queued jobs (workspace, VCS
//! credentials and variable scope) and fans each one out to the dispatch
//! backend without blocking the next tick.

use crate::dispatch::DispatchBackend;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use terrakube_core::model::{IacFlavor, Job, JobType};
use tracing::{debug, error, info, warn};

/// Jobs examined per tick.
const POLL_LIMIT: i64 = 10;

/// Everything an executor backend needs to run one step of a job.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionContext {
    pub organization_id: String,
    pub workspace_id: String,
    pub job_id: i64,
    pub step_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub source: String,
    pub branch: String,
    pub folder: String,
    pub terraform_version: String,
    pub iac_type: String,
    pub vcs_type: String,
    pub connection_type: String,
    pub access_token: String,
    pub module_ssh_key: String,
    pub commit_id: String,
    pub refresh: bool,
    pub refresh_only: bool,
    pub environment_variables: HashMap<String, String>,
    pub variables: HashMap<String, String>,
}

/// The API records the operation in the step name ("Plan", "Apply", ...).
fn job_type_from_step_name(name: &str) -> JobType {
    let name = name.to_lowercase();
    if name.contains("destroy") {
        JobType::TerraformDestroy
    } else if name.contains("apply") {
        JobType::TerraformApply
    } else if name.contains("approval") {
        JobType::Approval
    } else if name.contains("script") {
        JobType::CustomScripts
    } else {
        JobType::TerraformPlan
    }
}

impl ExecutionContext {
    /// Convert into the executor's job payload.
    pub fn into_job(self) -> Job {
        let iac_flavor = if self.iac_type == "tofu" {
            IacFlavor::Tofu
        } else {
            IacFlavor::Terraform
        };

        Job {
            job_id: self.job_id,
            step_id: self.step_id,
            organization_id: self.organization_id,
            workspace_id: self.workspace_id,
            job_type: self.job_type,
            source: self.source,
            branch: self.branch,
            folder: self.folder,
            vcs_type: self.vcs_type,
            connection_type: self.connection_type,
            access_token: self.access_token,
            module_ssh_key: self.module_ssh_key,
            commit_id: self.commit_id,
            iac_version: self.terraform_version,
            iac_flavor,
            refresh: self.refresh,
            refresh_only: self.refresh_only,
            environment_variables: self.environment_variables,
            variables: self.variables,
            ..Default::default()
        }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    status: String,
    commit_id: Option<String>,
    organization_id: String,
    workspace_id: String,
    refresh: bool,
    refresh_only: bool,
    source: Option<String>,
    branch: Option<String>,
    folder: Option<String>,
    terraform_version: Option<String>,
    iac_type: Option<String>,
    module_ssh_key: Option<String>,
    vcs_type: Option<String>,
    connection_type: Option<String>,
    access_token: Option<String>,
}

/// Polls for runnable jobs and hands them to a dispatch backend.
pub struct JobScheduler {
    pool: PgPool,
    backend: Arc<dyn DispatchBackend>,
    interval: Duration,
}

impl JobScheduler {
    pub fn new(pool: PgPool, backend: Arc<dyn DispatchBackend>, interval: Duration) -> Self {
        Self {
            pool,
            backend,
            interval,
        }
    }

    /// Run the polling loop until the process stops.
    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "job scheduler starting");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll().await;
        }
    }

    /// One scheduling tick: FIFO by job id within the tick.
    pub async fn poll(&self) {
        let rows: Vec<JobRow> = match sqlx::query_as(
            r#"
            SELECT j.id::int8 AS id, j.status, j.commit_id,
                   j.organization_id::text AS organization_id,
                   j.workspace_id::text AS workspace_id,
                   j.refresh, j.refresh_only,
                   w.source, w.branch, w.folder, w.terraform_version, w.iac_type,
                   w.module_ssh_key,
                   v.vcs_type, v.connection_type, v.access_token
            FROM job j
            JOIN workspace w ON j.workspace_id = w.id
            LEFT JOIN vcs v ON w.vcs_id = v.id
            WHERE j.status IN ('pending', 'queue')
            ORDER BY j.id ASC
            LIMIT $1
            "#,
        )
        .bind(POLL_LIMIT)
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!("error polling jobs: {e}");
                return;
            }
        };

        for row in rows {
            if row.status == "pending" {
                // First sighting: move into the queue, pick it up next tick.
                if let Err(e) = sqlx::query("UPDATE job SET status = 'queue' WHERE id = $1")
                    .bind(row.id)
                    .execute(&self.pool)
                    .await
                {
                    error!(job_id = row.id, "error queueing job: {e}");
                    continue;
                }
                debug!(job_id = row.id, "job queued");
                continue;
            }

            let step: Option<(String, String)> = match sqlx::query_as(
                "SELECT id::text, name FROM step WHERE job_id = $1 AND status = 'pending' ORDER BY step_number ASC LIMIT 1",
            )
            .bind(row.id)
            .fetch_optional(&self.pool)
            .await
            {
                Ok(step) => step,
                Err(e) => {
                    error!(job_id = row.id, "error selecting pending step: {e}");
                    continue;
                }
            };
            let Some((step_id, step_name)) = step else {
                debug!(job_id = row.id, "no pending step");
                continue;
            };

            let context = self
                .build_context(row, step_id.clone(), job_type_from_step_name(&step_name))
                .await;

            if let Err(e) = self.mark_running(context.job_id, &step_id).await {
                error!(job_id = context.job_id, "error marking job running: {e}");
                continue;
            }

            info!(job_id = context.job_id, step_id = %step_id, "dispatching job");
            let backend = self.backend.clone();
            let pool = self.pool.clone();
            tokio::spawn(async move {
                if let Err(e) = backend.dispatch(&context).await {
                    error!(job_id = context.job_id, "job dispatch failed: {e}");
                    mark_failed(&pool, context.job_id, &context.step_id).await;
                }
            });
        }
    }

    async fn build_context(
        &self,
        row: JobRow,
        step_id: String,
        job_type: JobType,
    ) -> ExecutionContext {
        let environment_variables = self
            .load_variables(&row.organization_id, &row.workspace_id, "ENV")
            .await;
        let variables = self
            .load_variables(&row.organization_id, &row.workspace_id, "TERRAFORM")
            .await;

        ExecutionContext {
            organization_id: row.organization_id,
            workspace_id: row.workspace_id,
            job_id: row.id,
            step_id,
            job_type,
            source: row.source.unwrap_or_default(),
            branch: row.branch.unwrap_or_default(),
            folder: row.folder.unwrap_or_default(),
            terraform_version: row.terraform_version.unwrap_or_default(),
            iac_type: row.iac_type.unwrap_or_default(),
            vcs_type: row.vcs_type.unwrap_or_default(),
            connection_type: row.connection_type.unwrap_or_default(),
            access_token: row.access_token.unwrap_or_default(),
            module_ssh_key: row.module_ssh_key.unwrap_or_default(),
            commit_id: row.commit_id.unwrap_or_default(),
            refresh: row.refresh,
            refresh_only: row.refresh_only,
            environment_variables,
            variables,
        }
    }

    /// Variable scope is global-then-workspace, so workspace values override
    /// organization-wide ones.
    async fn load_variables(
        &self,
        organization_id: &str,
        workspace_id: &str,
        category: &str,
    ) -> HashMap<String, String> {
        let mut variables = HashMap::new();

        let globals: Vec<(String, String)> = sqlx::query_as(
            "SELECT variable_key, variable_value FROM globalvar
             WHERE organization_id = $1::uuid AND variable_category = $2",
        )
        .bind(organization_id)
        .bind(category)
        .fetch_all(&self.pool)
        .await
        .unwrap_or_else(|e| {
            warn!("error loading global variables: {e}");
            Vec::new()
        });
        for (key, value) in globals {
            variables.insert(key, value);
        }

        let workspace_vars: Vec<(String, String)> = sqlx::query_as(
            "SELECT variable_key, variable_value FROM variable
             WHERE workspace_id = $1::uuid AND variable_category = $2",
        )
        .bind(workspace_id)
        .bind(category)
        .fetch_all(&self.pool)
        .await
        .unwrap_or_else(|e| {
            warn!("error loading workspace variables: {e}");
            Vec::new()
        });
        for (key, value) in workspace_vars {
            variables.insert(key, value);
        }

        variables
    }

    async fn mark_running(&self, job_id: i64, step_id: &str) -> sqlx::Result<()> {
        sqlx::query("UPDATE step SET status = 'running' WHERE id = $1::uuid")
            .bind(step_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE job SET status = 'running' WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

async fn mark_failed(pool: &PgPool, job_id: i64, step_id: &str) {
    if let Err(e) = sqlx::query("UPDATE step SET status = 'failed' WHERE id = $1::uuid")
        .bind(step_id)
        .execute(pool)
        .await
    {
        error!(job_id, "error marking step failed: {e}");
    }
    if let Err(e) = sqlx::query("UPDATE job SET status = 'failed' WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await
    {
        error!(job_id, "error marking job failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_into_job_maps_fields() {
        let mut environment_variables = HashMap::new();
        environment_variables.insert("AWS_REGION".to_string(), "us-east-1".to_string());

        let context = ExecutionContext {
            organization_id: "org".into(),
            workspace_id: "ws".into(),
            job_id: 42,
            step_id: "step".into(),
            job_type: JobType::TerraformApply,
            source: "https://github.com/a/b.git".into(),
            branch: "main".into(),
            terraform_version: "1.5.7".into(),
            iac_type: "terraform".into(),
            refresh: true,
            environment_variables,
            ..Default::default()
        };

        let job = context.into_job();
        assert_eq!(job.job_id, 42);
        assert_eq!(job.job_type, JobType::TerraformApply);
        assert_eq!(job.iac_version, "1.5.7");
        assert_eq!(job.iac_flavor, IacFlavor::Terraform);
        assert!(job.refresh);
        assert_eq!(
            job.environment_variables.get("AWS_REGION").map(String::as_str),
            Some("us-east-1")
        );
    }

    #[test]
    fn test_context_serializes_camel_case() {
        let context = ExecutionContext {
            job_id: 7,
            step_id: "s".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(&context).unwrap();
        assert_eq!(value["jobId"], 7);
        assert_eq!(value["stepId"], "s");
        assert!(value.get("environmentVariables").is_some());
    }

    #[test]
    fn test_tofu_flavor_mapping() {
        let context = ExecutionContext {
            iac_type: "tofu".into(),
            terraform_version: "1.7.0".into(),
            ..Default::default()
        };
        let job = context.into_job();
        assert_eq!(job.iac_flavor, IacFlavor::Tofu);
    }

    #[test]
    fn test_job_type_from_step_name() {
        assert_eq!(
            job_type_from_step_name("Running Terraform PLAN"),
            JobType::TerraformPlan
        );
        assert_eq!(
            job_type_from_step_name("Terraform Apply"),
            JobType::TerraformApply
        );
        assert_eq!(
            job_type_from_step_name("Destroy infrastructure"),
            JobType::TerraformDestroy
        );
        assert_eq!(job_type_from_step_name("Approval gate"), JobType::Approval);
        assert_eq!(
            job_type_from_step_name("Custom scripts"),
            JobType::CustomScripts
        );
    }
}
