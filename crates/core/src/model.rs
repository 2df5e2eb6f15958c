//! Wire model for jobs, steps and lifecycle commands.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a dispatched job asks the executor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JobType {
    #[serde(rename = "terraformPlan")]
    TerraformPlan,
    #[serde(rename = "terraformApply")]
    TerraformApply,
    #[serde(rename = "terraformDestroy")]
    TerraformDestroy,
    #[serde(rename = "customScripts")]
    CustomScripts,
    #[serde(rename = "approval")]
    Approval,
    /// Anything the control plane sends that this executor does not know.
    #[default]
    #[serde(other, rename = "unknown")]
    Unknown,
}

impl JobType {
    /// Whether this type drives the external IaC binary.
    pub fn is_iac(&self) -> bool {
        matches!(
            self,
            Self::TerraformPlan | Self::TerraformApply | Self::TerraformDestroy
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TerraformPlan => "terraformPlan",
            Self::TerraformApply => "terraformApply",
            Self::TerraformDestroy => "terraformDestroy",
            Self::CustomScripts => "customScripts",
            Self::Approval => "approval",
            Self::Unknown => "unknown",
        }
    }
}

/// Which external binary executes the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IacFlavor {
    #[default]
    Terraform,
    Tofu,
}

impl IacFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terraform => "terraform",
            Self::Tofu => "tofu",
        }
    }
}

/// One user script in a job's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Command {
    pub priority: i32,
    pub script: String,
    /// BASH is the only supported runtime.
    pub runtime: String,
    /// Run before the IaC binary is initialized.
    pub before_init: bool,
    /// Run after init, before the main command.
    pub before: bool,
    /// Run after the main command succeeded.
    pub after: bool,
    /// Run after the main command failed.
    pub on_failure: bool,
    /// Print a banner before executing.
    pub verbose: bool,
}

/// Unit of work the control plane hands to an executor.
///
/// The API may leave optional fields as `null`; every field defaults so a
/// deserialized job is always fully initialized.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Job {
    pub job_id: i64,
    pub step_id: String,
    pub organization_id: String,
    pub workspace_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub source: String,
    pub branch: String,
    pub folder: String,
    pub vcs_type: String,
    pub connection_type: String,
    pub access_token: String,
    pub module_ssh_key: String,
    pub commit_id: String,
    pub iac_version: String,
    pub iac_flavor: IacFlavor,
    pub refresh: bool,
    pub refresh_only: bool,
    pub ignore_error: bool,
    pub show_header: bool,
    pub override_backend: bool,
    pub command_list: Vec<Command>,
    pub environment_variables: HashMap<String, String>,
    pub variables: HashMap<String, String>,
    pub terraform_output: String,
}

impl Job {
    /// Storage key of the workspace state file.
    pub fn state_key(&self) -> String {
        format!(
            "organization/{}/workspace/{}/state/terraform.tfstate",
            self.organization_id, self.workspace_id
        )
    }

    /// Storage key of the saved plan for this step.
    pub fn plan_key(&self) -> String {
        format!(
            "organization/{}/workspace/{}/job/{}/step/{}/terraformLibrary.tfplan",
            self.organization_id, self.workspace_id, self.job_id, self.step_id
        )
    }

    /// Storage key of the post-apply state JSON projection.
    pub fn state_json_key(&self) -> String {
        format!(
            "tfstate/{}/{}/state/state.json",
            self.organization_id, self.workspace_id
        )
    }

    /// Storage key of the raw pulled state.
    pub fn raw_state_key(&self) -> String {
        format!(
            "tfstate/{}/{}/state/state.raw.json",
            self.organization_id, self.workspace_id
        )
    }

    /// Storage key of the captured log output for this step.
    pub fn output_key(&self) -> String {
        format!(
            "tfoutput/{}/{}/{}.tfoutput",
            self.organization_id, self.job_id, self.step_id
        )
    }
}

/// Job statuses owned by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Pending,
    Queue,
    Running,
    Completed,
    Failed,
    WaitingApproval,
    Approved,
    Cancelled,
    NoChanges,
    NotExecuted,
    Rejected,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queue => "queue",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::WaitingApproval => "waitingApproval",
            Self::Approved => "approved",
            Self::Cancelled => "cancelled",
            Self::NoChanges => "noChanges",
            Self::NotExecuted => "notExecuted",
            Self::Rejected => "rejected",
        }
    }
}

/// Step statuses the executor transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}
