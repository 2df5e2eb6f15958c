//! Driving the external `terraform`/`tofu` binary.

use crate::process::{run_captured, run_streamed};
use crate::{Error, Result};
use std::path::Path;
use terrakube_core::model::{Job, JobType};
use terrakube_logs::LogStream;
use tokio::process::Command;
use tracing::debug;

/// File the processor materializes a saved plan into before an apply.
pub const SAVED_PLAN_FILE: &str = "terraformLibrary.tfPlan";
/// Plan artifact produced by `plan -out`.
pub const PLAN_OUT_FILE: &str = "terraform.tfplan";
/// Per-job CLI credentials file, selected via TF_CLI_CONFIG_FILE.
pub const CLI_CONFIG_FILE: &str = ".terraformrc";

/// Outcome of the main IaC command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    /// 0 = clean, 2 = plan reported pending changes.
    pub exit_code: i32,
}

/// Wraps one IaC binary invocation context: a job, its working directory and
/// the resolved executable.
pub struct IacDriver<'a> {
    job: &'a Job,
    working_dir: &'a Path,
    exec_path: &'a Path,
}

impl<'a> IacDriver<'a> {
    pub fn new(job: &'a Job, working_dir: &'a Path, exec_path: &'a Path) -> Self {
        Self {
            job,
            working_dir,
            exec_path,
        }
    }

    /// Environment for the binary: OS env plus job env vars plus
    /// `TF_VAR_<name>` for each job variable. Color output stays on, so no
    /// `-no-color` anywhere.
    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(self.exec_path);
        cmd.args(args).current_dir(self.working_dir);
        for (key, value) in &self.job.environment_variables {
            cmd.env(key, value);
        }
        for (key, value) in &self.job.variables {
            cmd.env(format!("TF_VAR_{key}"), value);
        }
        let cli_config = self.working_dir.join(CLI_CONFIG_FILE);
        if cli_config.exists() {
            cmd.env("TF_CLI_CONFIG_FILE", cli_config);
        }
        cmd
    }

    /// `init` then the job's main command, streaming all output.
    pub async fn execute(&self, stream: &mut LogStream) -> Result<ExecutionResult> {
        if self.job.show_header {
            let header = format!(
                "\n========================================\nRunning {}\n========================================\n",
                self.job.job_type.as_str()
            );
            stream.write(header.as_bytes()).await?;
        }

        self.init(stream).await?;

        let result = match self.job.job_type {
            JobType::TerraformPlan => self.plan(stream).await,
            JobType::TerraformApply => self.apply(stream).await,
            JobType::TerraformDestroy => self.destroy(stream).await,
            other => return Err(Error::UnknownJobType(other.as_str().to_string())),
        };

        match result {
            Ok(result) => Ok(result),
            Err(e) if self.job.ignore_error => {
                debug!("ignoring IaC failure per job settings: {e}");
                Ok(ExecutionResult {
                    success: true,
                    exit_code: 0,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn init(&self, stream: &mut LogStream) -> Result<()> {
        let mut cmd = self.command(&["init", "-input=false", "-upgrade"]);
        let exit_code = run_streamed(&mut cmd, stream).await?;
        if exit_code != 0 {
            return Err(Error::build("init", exit_code));
        }
        Ok(())
    }

    async fn plan(&self, stream: &mut LogStream) -> Result<ExecutionResult> {
        let out_file = self.working_dir.join(PLAN_OUT_FILE);
        let out_arg = format!("-out={}", out_file.display());
        let mut args = vec!["plan", "-input=false", "-detailed-exitcode", out_arg.as_str()];
        if self.job.refresh {
            args.push("-refresh=true");
        }
        if self.job.refresh_only {
            args.push("-refresh-only");
        }

        let mut cmd = self.command(&args);
        match run_streamed(&mut cmd, stream).await? {
            0 => Ok(ExecutionResult {
                success: true,
                exit_code: 0,
            }),
            // Detailed exit code 2: changes present, not an error.
            2 => Ok(ExecutionResult {
                success: true,
                exit_code: 2,
            }),
            code => Err(Error::build("plan", code)),
        }
    }

    async fn apply(&self, stream: &mut LogStream) -> Result<ExecutionResult> {
        let saved_plan = self.working_dir.join(SAVED_PLAN_FILE);
        let mut cmd = if saved_plan.exists() {
            let plan_arg = saved_plan.to_string_lossy().into_owned();
            self.command(&["apply", "-input=false", "-auto-approve", plan_arg.as_str()])
        } else {
            let mut args = vec!["apply", "-input=false", "-auto-approve"];
            if self.job.refresh {
                args.push("-refresh=true");
            }
            self.command(&args)
        };

        let exit_code = run_streamed(&mut cmd, stream).await?;
        if exit_code != 0 {
            return Err(Error::build("apply", exit_code));
        }
        Ok(ExecutionResult {
            success: true,
            exit_code: 0,
        })
    }

    async fn destroy(&self, stream: &mut LogStream) -> Result<ExecutionResult> {
        let mut args = vec!["destroy", "-input=false", "-auto-approve"];
        if self.job.refresh {
            args.push("-refresh=true");
        }

        let mut cmd = self.command(&args);
        let exit_code = run_streamed(&mut cmd, stream).await?;
        if exit_code != 0 {
            return Err(Error::build("destroy", exit_code));
        }
        Ok(ExecutionResult {
            success: true,
            exit_code: 0,
        })
    }

    /// JSON-encoded outputs map.
    pub async fn output(&self) -> Result<String> {
        run_captured(&mut self.command(&["output", "-json"])).await
    }

    /// State JSON projection of the local state file.
    pub async fn show_state(&self) -> Result<String> {
        run_captured(&mut self.command(&["show", "-json", "terraform.tfstate"])).await
    }

    /// Raw state document.
    pub async fn state_pull(&self) -> Result<String> {
        run_captured(&mut self.command(&["state", "pull"])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fake_binary(dir: &Path, script: &str) -> PathBuf {
        let path = dir.join("terraform");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    fn plan_job() -> Job {
        Job {
            job_type: JobType::TerraformPlan,
            variables: [("region".to_string(), "us-east-1".to_string())].into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_plan_exit_two_is_pending_changes() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_binary(
            dir.path(),
            r#"case "$1" in init) exit 0;; plan) echo changes; exit 2;; esac"#,
        );

        let job = plan_job();
        let driver = IacDriver::new(&job, dir.path(), &binary);
        let mut stream = LogStream::console();
        let result = driver.execute(&mut stream).await.unwrap();

        assert!(result.success);
        assert_eq!(result.exit_code, 2);
        assert!(stream.contents().contains("changes"));
    }

    #[tokio::test]
    async fn test_plan_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_binary(
            dir.path(),
            r#"case "$1" in init) exit 0;; plan) echo boom 1>&2; exit 1;; esac"#,
        );

        let job = plan_job();
        let driver = IacDriver::new(&job, dir.path(), &binary);
        let mut stream = LogStream::console();
        let err = driver.execute(&mut stream).await.unwrap_err();
        assert!(matches!(err, Error::Build { exit_code: 1, .. }));
    }

    #[tokio::test]
    async fn test_ignore_error_coerces_success() {
        let dir = tempfile::tempdir().unwrap();
        // init stays clean; only the plan stage fails.
        let binary = fake_binary(
            dir.path(),
            r#"case "$1" in init) exit 0;; *) exit 1;; esac"#,
        );

        let mut job = plan_job();
        job.ignore_error = true;

        let driver = IacDriver::new(&job, dir.path(), &binary);
        let mut stream = LogStream::console();
        let result = driver.execute(&mut stream).await.unwrap();
        assert_eq!(
            result,
            ExecutionResult {
                success: true,
                exit_code: 0
            }
        );
    }

    #[tokio::test]
    async fn test_tf_vars_injected() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("vars.txt");
        let binary = fake_binary(
            dir.path(),
            &format!(
                r#"case "$1" in init) echo "$TF_VAR_region" > {}; exit 0;; plan) exit 0;; esac"#,
                marker.display()
            ),
        );

        let job = plan_job();
        let driver = IacDriver::new(&job, dir.path(), &binary);
        let mut stream = LogStream::console();
        driver.execute(&mut stream).await.unwrap();

        assert_eq!(std::fs::read_to_string(marker).unwrap().trim(), "us-east-1");
    }

    #[tokio::test]
    async fn test_apply_prefers_saved_plan() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("args.txt");
        std::fs::write(dir.path().join(SAVED_PLAN_FILE), b"plan-bytes").unwrap();
        let binary = fake_binary(
            dir.path(),
            &format!(r#"echo "$@" >> {}; exit 0"#, marker.display()),
        );

        let job = Job {
            job_type: JobType::TerraformApply,
            refresh: true,
            ..Default::default()
        };
        let driver = IacDriver::new(&job, dir.path(), &binary);
        let mut stream = LogStream::console();
        driver.execute(&mut stream).await.unwrap();

        let recorded = std::fs::read_to_string(marker).unwrap();
        let apply_line = recorded
            .lines()
            .find(|line| line.starts_with("apply"))
            .expect("apply invocation recorded");
        assert!(apply_line.contains(SAVED_PLAN_FILE));
        // Plan-file applies never pass refresh flags.
        assert!(!apply_line.contains("-refresh"));
    }

    #[tokio::test]
    async fn test_state_pull_captured() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_binary(
            dir.path(),
            r#"if [ "$1" = "state" ]; then printf '{"version":4}'; fi"#,
        );

        let job = plan_job();
        let driver = IacDriver::new(&job, dir.path(), &binary);
        assert_eq!(driver.state_pull().await.unwrap(), r#"{"version":4}"#);
    }
}
