//! Per-job working directory lifecycle.

use crate::Result;
use std::path::{Path, PathBuf};
use terrakube_core::model::Job;
use tracing::{debug, warn};

/// One job's checkout. Created at job start, destroyed on every exit path.
pub struct Workspace {
    root: PathBuf,
    working_dir: PathBuf,
    commit_id: String,
}

impl Workspace {
    /// Clone the job's source and return the working directory (the checkout
    /// narrowed by the job folder).
    pub async fn setup(job: &Job) -> Result<Self> {
        let checkout = terrakube_git::clone_workspace(
            &job.source,
            &job.branch,
            &job.vcs_type,
            &job.connection_type,
            &job.access_token,
            &job.folder,
            job.job_id,
        )
        .await?;

        debug!(
            job_id = job.job_id,
            commit = %checkout.commit_id,
            dir = %checkout.path.display(),
            "workspace ready"
        );

        Ok(Self {
            root: checkout.root,
            working_dir: checkout.path,
            commit_id: checkout.commit_id,
        })
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn commit_id(&self) -> &str {
        &self.commit_id
    }

    /// Remove the checkout. Also runs on drop, so early returns stay clean.
    pub fn cleanup(&self) {
        if self.root.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.root) {
                warn!(dir = %self.root.display(), "failed to remove working dir: {e}");
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}
