//! Environment-driven configuration.
//!
//! Variable names keep compatibility with the Java control plane: most
//! settings can be provided under a current name or one of the legacy
//! fallbacks, first non-empty wins.

use crate::error::{Error, Result};
use crate::model::Job;
use base64::Engine;
use std::env;

/// Which services this process hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    Api,
    Registry,
    Executor,
    All,
}

impl ServiceType {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "api" => Ok(Self::Api),
            "registry" => Ok(Self::Registry),
            "executor" => Ok(Self::Executor),
            "all" | "" => Ok(Self::All),
            other => Err(Error::config(format!(
                "unknown SERVICE_TYPE: {other}. Supported values are: api, registry, executor, all"
            ))),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Aws,
    Azure,
    Gcp,
    Local,
}

/// Executor execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMode {
    Online,
    Batch,
}

/// Runtime configuration shared by the api, registry and executor services.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: String,
    pub registry_base_url: String,
    pub api_url: String,
    pub database_url: String,
    pub hostname: String,

    pub storage_type: StorageType,
    pub aws_bucket_name: String,
    pub aws_region: String,
    pub aws_access_key: String,
    pub aws_secret_key: String,
    pub aws_endpoint: String,
    pub azure_account_name: String,
    pub azure_account_key: String,
    pub azure_container_name: String,
    pub gcp_project_id: String,
    pub gcp_bucket_name: String,
    pub gcp_credentials: String,

    pub internal_secret: String,
    pub pat_secret: String,
    pub auth_validation_type: String,
    pub issuer_uri: String,
    pub app_client_id: String,
    pub ui_url: String,

    pub executor_mode: ExecutorMode,
    pub ephemeral_job: Option<Job>,
    pub registry_domain: String,

    pub redis_enabled: bool,
    pub redis_host: String,
    pub redis_password: String,

    pub ephemeral_namespace: String,
    pub ephemeral_image: String,
    pub ephemeral_secret_name: String,
    pub ephemeral_service_account: String,
}

fn get_env(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

/// Try several variable names in order, returning the first non-empty value.
fn env_chain(keys: &[&str]) -> String {
    for key in keys {
        if let Ok(value) = env::var(key) {
            if !value.is_empty() {
                return value;
            }
        }
    }
    String::new()
}

fn storage_type_from_env() -> StorageType {
    let raw = env::var("STORAGE_TYPE").unwrap_or_default();
    if !raw.is_empty() {
        return match raw.as_str() {
            "AWS" | "AwsStorageImpl" => StorageType::Aws,
            "AZURE" | "AzureStorageImpl" => StorageType::Azure,
            "GCP" | "GcpStorageImpl" => StorageType::Gcp,
            _ => StorageType::Local,
        };
    }
    // Legacy Java impl-class names.
    match env::var("TerraformStateType").unwrap_or_default().as_str() {
        "AwsTerraformStateImpl" => StorageType::Aws,
        "AzureTerraformStateImpl" => StorageType::Azure,
        "GcpTerraformStateImpl" => StorageType::Gcp,
        _ => StorageType::Local,
    }
}

/// The control plane marks ephemeral pods with a batch flag and inlines the
/// job payload; presence of the payload alone also selects batch mode.
fn executor_mode_from_env() -> ExecutorMode {
    match env::var("EXECUTOR_MODE").unwrap_or_default().as_str() {
        "BATCH" => return ExecutorMode::Batch,
        "ONLINE" => return ExecutorMode::Online,
        _ => {}
    }
    if env::var("EphemeralFlagBatch").as_deref() == Ok("true")
        || env::var("ExecutorFlagBatch").as_deref() == Ok("true")
        || !env_chain(&["EphemeralJobData", "EPHEMERAL_JOB_DATA"]).is_empty()
    {
        return ExecutorMode::Batch;
    }
    ExecutorMode::Online
}

fn decode_ephemeral_job() -> Result<Option<Job>> {
    let raw = env_chain(&["EphemeralJobData", "EPHEMERAL_JOB_DATA"]);
    if raw.is_empty() {
        return Err(Error::config(
            "BATCH mode but EphemeralJobData/EPHEMERAL_JOB_DATA is empty",
        ));
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|e| Error::config(format!("failed to decode EPHEMERAL_JOB_DATA: {e}")))?;
    let job: Job = serde_json::from_slice(&decoded)
        .map_err(|e| Error::config(format!("failed to parse EPHEMERAL_JOB_DATA: {e}")))?;
    Ok(Some(job))
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let executor_mode = executor_mode_from_env();
        let ephemeral_job = match executor_mode {
            ExecutorMode::Batch => decode_ephemeral_job()?,
            ExecutorMode::Online => None,
        };

        // Executor deployments override the API url and secret under their
        // own variable names.
        let mut api_url = get_env("AzBuilderApiUrl", "http://localhost:8080");
        let api_override = env_chain(&["TERRAKUBE_API_URL", "TerrakubeApiUrl"]);
        if !api_override.is_empty() {
            api_url = api_override;
        }

        let mut internal_secret = get_env("InternalSecret", "");
        let secret_override = env_chain(&["TERRAKUBE_INTERNAL_SECRET"]);
        if !secret_override.is_empty() {
            internal_secret = secret_override;
        }

        Ok(Self {
            port: get_env("PORT", "8075"),
            registry_base_url: get_env("AzBuilderRegistry", "http://localhost:8075"),
            api_url,
            database_url: env_chain(&["DATABASE_URL", "DatabaseUrl"]),
            hostname: get_env("TerrakubeHostname", "localhost"),

            storage_type: storage_type_from_env(),
            aws_bucket_name: env_chain(&[
                "AwsStorageBucketName",
                "AWS_BUCKET_NAME",
                "AwsTerraformStateBucketName",
                "AwsTerraformOutputBucketName",
            ]),
            aws_region: env_chain(&[
                "AwsStorageRegion",
                "AWS_REGION",
                "AwsTerraformStateRegion",
                "AwsTerraformOutputRegion",
            ]),
            aws_access_key: env_chain(&[
                "AwsStorageAccessKey",
                "AWS_ACCESS_KEY_ID",
                "AwsTerraformStateAccessKey",
            ]),
            aws_secret_key: env_chain(&[
                "AwsStorageSecretKey",
                "AWS_SECRET_ACCESS_KEY",
                "AwsTerraformStateSecretKey",
            ]),
            aws_endpoint: get_env("AwsEndpoint", ""),
            azure_account_name: get_env("AzureStorageAccountName", ""),
            azure_account_key: get_env("AzureStorageAccountKey", ""),
            azure_container_name: get_env("AzureStorageContainerName", ""),
            gcp_project_id: get_env("GcpStorageProjectId", ""),
            gcp_bucket_name: get_env("GcpStorageBucketName", ""),
            gcp_credentials: get_env("GcpStorageCredentials", ""),

            internal_secret,
            pat_secret: get_env("PatSecret", ""),
            auth_validation_type: env_chain(&[
                "AuthenticationValidationTypeRegistry",
                "AUTH_VALIDATION_TYPE",
            ]),
            issuer_uri: env_chain(&["DexIssuerUri", "APP_ISSUER_URI"]),
            app_client_id: get_env("AppClientId", ""),
            ui_url: env_chain(&["TerrakubeUiURL", "TERRAKUBE_UI_URL"]),

            executor_mode,
            ephemeral_job,
            registry_domain: env_chain(&["TERRAKUBE_REGISTRY_DOMAIN", "TerrakubeRegistryDomain"]),

            redis_enabled: env::var("USE_REDIS_LOGS").as_deref() == Ok("true"),
            redis_host: get_env("REDIS_HOST", "localhost:6379"),
            redis_password: get_env("REDIS_PASSWORD", ""),

            ephemeral_namespace: get_env("ExecutorEphemeralNamespace", "terrakube"),
            ephemeral_image: get_env("ExecutorEphemeralImage", ""),
            ephemeral_secret_name: get_env("ExecutorEphemeralSecret", ""),
            ephemeral_service_account: get_env("ExecutorEphemeralServiceAccount", ""),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep each one to variables nothing
    // else reads.

    #[test]
    fn test_env_chain_prefers_first_non_empty() {
        env::set_var("TK_TEST_CHAIN_B", "second");
        assert_eq!(env_chain(&["TK_TEST_CHAIN_A", "TK_TEST_CHAIN_B"]), "second");
        env::set_var("TK_TEST_CHAIN_A", "first");
        assert_eq!(env_chain(&["TK_TEST_CHAIN_A", "TK_TEST_CHAIN_B"]), "first");
        env::remove_var("TK_TEST_CHAIN_A");
        env::remove_var("TK_TEST_CHAIN_B");
    }

    #[test]
    fn test_service_type_parse() {
        assert_eq!(ServiceType::parse("api").unwrap(), ServiceType::Api);
        assert_eq!(ServiceType::parse("").unwrap(), ServiceType::All);
        assert!(ServiceType::parse("worker").is_err());
    }
}
