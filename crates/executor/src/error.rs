//! Error types for job execution.

use thiserror::Error;

/// Result type alias for executor operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid {flavor} version {version}: {reason}")]
    VersionInvalid {
        flavor: &'static str,
        version: String,
        reason: String,
    },

    #[error("failed to download {0}")]
    DownloadFailed(String),

    #[error("failed to extract {0}")]
    ExtractFailed(String),

    #[error(transparent)]
    Clone(#[from] terrakube_git::Error),

    #[error("error running {command}: exit code {exit_code}")]
    Build { command: String, exit_code: i32 },

    #[error("{phase} script execution failed: {message}")]
    Script { phase: &'static str, message: String },

    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error(transparent)]
    Storage(#[from] terrakube_storage::Error),

    #[error(transparent)]
    Api(#[from] terrakube_client::Error),

    #[error(transparent)]
    Auth(#[from] terrakube_auth::Error),

    #[error(transparent)]
    Log(#[from] terrakube_logs::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn build(command: impl Into<String>, exit_code: i32) -> Self {
        Self::Build {
            command: command.into(),
            exit_code,
        }
    }

    pub fn script(phase: &'static str, message: impl Into<String>) -> Self {
        Self::Script {
            phase,
            message: message.into(),
        }
    }
}
