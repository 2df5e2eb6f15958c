//! User lifecycle scripts around the IaC run.

use crate::process::run_streamed;
use crate::{Error, Result};
use std::path::Path;
use terrakube_core::model::{Command as JobCommand, Job};
use terrakube_logs::LogStream;
use tokio::process::Command;
use tracing::debug;

/// Lifecycle phase a command can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before the IaC binary is initialized; failure aborts the job.
    BeforeInit,
    /// Between init and the main command.
    Before,
    /// After the main command succeeded.
    After,
    /// After the main command failed.
    OnFailure,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeInit => "beforeInit",
            Self::Before => "before",
            Self::After => "after",
            Self::OnFailure => "onFailure",
        }
    }

    fn matches(&self, command: &JobCommand) -> bool {
        match self {
            Self::BeforeInit => command.before_init,
            // Commands already run in beforeInit are not run again here.
            Self::Before => command.before && !command.before_init,
            Self::After => command.after,
            Self::OnFailure => command.on_failure,
        }
    }
}

/// Runs a job's commands with the executor-injected environment.
pub struct ScriptRunner<'a> {
    job: &'a Job,
    working_dir: &'a Path,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(job: &'a Job, working_dir: &'a Path) -> Self {
        Self { job, working_dir }
    }

    fn injected_env(&self) -> Vec<(String, String)> {
        let job = self.job;
        let mut env = vec![
            ("workingDirectory".into(), self.working_dir.to_string_lossy().into_owned()),
            ("organizationId".into(), job.organization_id.clone()),
            ("workspaceId".into(), job.workspace_id.clone()),
            ("jobId".into(), job.job_id.to_string()),
            ("stepId".into(), job.step_id.clone()),
            ("terraformVersion".into(), job.iac_version.clone()),
            ("source".into(), job.source.clone()),
            ("branch".into(), job.branch.clone()),
            ("vcsType".into(), job.vcs_type.clone()),
            ("accessToken".into(), job.access_token.clone()),
            ("terraformOutput".into(), job.terraform_output.clone()),
        ];
        for (key, value) in &job.environment_variables {
            env.push((key.clone(), value.clone()));
        }
        for (key, value) in &job.variables {
            env.push((key.clone(), value.clone()));
        }
        env
    }

    /// Commands matching `phase`, ordered by ascending priority. The sort is
    /// stable so list order breaks ties.
    fn commands_for(&self, phase: Phase) -> Vec<&'a JobCommand> {
        let mut commands: Vec<&JobCommand> = self
            .job
            .command_list
            .iter()
            .filter(|command| phase.matches(command))
            .collect();
        commands.sort_by_key(|command| command.priority);
        commands
    }

    /// Run every command of `phase`; the first non-zero exit aborts the rest.
    pub async fn execute_phase(&self, phase: Phase, stream: &mut LogStream) -> Result<()> {
        let commands = self.commands_for(phase);
        if commands.is_empty() {
            return Ok(());
        }
        debug!(phase = phase.as_str(), count = commands.len(), "running scripts");

        for command in commands {
            if command.verbose {
                let banner = format!(
                    "\n--- Running {} script (priority: {}) ---\n",
                    phase.as_str(),
                    command.priority
                );
                stream.write(banner.as_bytes()).await?;
            }

            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(&command.script)
                .current_dir(self.working_dir)
                .envs(self.injected_env());

            let exit_code = run_streamed(&mut cmd, stream).await?;
            if exit_code != 0 {
                return Err(Error::script(
                    phase.as_str(),
                    format!("{} (exit code {exit_code})", command.script),
                ));
            }
        }
        Ok(())
    }

    /// Run the whole command list ordered by priority, regardless of phase
    /// flags. Used by `customScripts` and `approval` jobs.
    pub async fn execute_all(&self, stream: &mut LogStream) -> Result<()> {
        let mut commands: Vec<&JobCommand> = self.job.command_list.iter().collect();
        commands.sort_by_key(|command| command.priority);

        for command in commands {
            if command.verbose {
                let banner = format!(
                    "\n--- Running script (priority: {}) ---\n{}\n---\n",
                    command.priority, command.script
                );
                stream.write(banner.as_bytes()).await?;
            }

            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(&command.script)
                .current_dir(self.working_dir)
                .envs(self.injected_env());

            let exit_code = run_streamed(&mut cmd, stream).await?;
            if exit_code != 0 {
                return Err(Error::script(
                    "customScripts",
                    format!("{} (exit code {exit_code})", command.script),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrakube_core::model::Command as JobCommand;

    fn command(priority: i32, script: &str) -> JobCommand {
        JobCommand {
            priority,
            script: script.to_string(),
            before_init: true,
            ..Default::default()
        }
    }

    fn job_with(commands: Vec<JobCommand>) -> Job {
        Job {
            job_id: 9,
            step_id: "step".into(),
            organization_id: "org".into(),
            workspace_id: "ws".into(),
            command_list: commands,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_phase_ordering_by_priority() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("order.txt");
        let job = job_with(vec![
            command(20, &format!("echo second >> {}", marker.display())),
            command(10, &format!("echo first >> {}", marker.display())),
        ]);

        let runner = ScriptRunner::new(&job, dir.path());
        let mut stream = LogStream::console();
        runner
            .execute_phase(Phase::BeforeInit, &mut stream)
            .await
            .unwrap();

        let content = std::fs::read_to_string(marker).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_commands() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran.txt");
        let job = job_with(vec![
            command(1, "exit 3"),
            command(2, &format!("touch {}", marker.display())),
        ]);

        let runner = ScriptRunner::new(&job, dir.path());
        let mut stream = LogStream::console();
        let err = runner
            .execute_phase(Phase::BeforeInit, &mut stream)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Script { phase: "beforeInit", .. }));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_before_excludes_before_init_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut both = command(1, "exit 1");
        both.before = true; // also beforeInit=true from the helper

        let job = job_with(vec![both]);
        let runner = ScriptRunner::new(&job, dir.path());
        let mut stream = LogStream::console();

        // Nothing matches `before`, so the failing script never runs.
        runner
            .execute_phase(Phase::Before, &mut stream)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_injected_environment() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("env.txt");
        let mut cmd = command(1, &format!("echo $organizationId:$jobId > {}", marker.display()));
        cmd.before_init = true;

        let job = job_with(vec![cmd]);
        let runner = ScriptRunner::new(&job, dir.path());
        let mut stream = LogStream::console();
        runner
            .execute_phase(Phase::BeforeInit, &mut stream)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(marker).unwrap().trim(), "org:9");
    }

    #[tokio::test]
    async fn test_verbose_banner_in_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = command(5, "true");
        cmd.verbose = true;

        let job = job_with(vec![cmd]);
        let runner = ScriptRunner::new(&job, dir.path());
        let mut stream = LogStream::console();
        runner
            .execute_phase(Phase::BeforeInit, &mut stream)
            .await
            .unwrap();

        assert!(stream
            .contents()
            .contains("Running beforeInit script (priority: 5)"));
    }
}
