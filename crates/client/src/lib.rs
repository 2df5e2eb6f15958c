//! Control-plane API client.
//!
//! Speaks three dialects of the same API: JSON:API for status mutations,
//! GraphQL for module metadata lookups, and plain REST for credentials and
//! provider proxying. Every call carries a freshly minted internal token.

mod graphql;

pub use graphql::ModuleDefinition;

use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Result type alias for API calls.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("request failed: {0}")]
    Network(String),

    #[error("api returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("graphql error: {0}")]
    GraphQl(String),

    #[error("module not found")]
    ModuleNotFound,

    #[error(transparent)]
    Auth(#[from] terrakube_auth::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client against the control-plane API.
#[derive(Clone)]
pub struct ControlPlaneClient {
    api_url: String,
    internal_secret: String,
    http: reqwest::Client,
}

impl ControlPlaneClient {
    pub fn new(api_url: impl Into<String>, internal_secret: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            internal_secret: internal_secret.into(),
            http: reqwest::Client::builder()
                .timeout(CLIENT_TIMEOUT)
                .build()
                .expect("reqwest client"),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn bearer(&self) -> Result<String> {
        Ok(terrakube_auth::generate_internal_token(&self.internal_secret)?)
    }

    async fn patch(&self, path: &str, payload: Value) -> Result<()> {
        let token = self.bearer()?;
        let response = self
            .http
            .patch(format!("{}{path}", self.api_url))
            .header("Content-Type", JSON_API_CONTENT_TYPE)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    async fn post(&self, path: &str, payload: Value) -> Result<()> {
        let token = self.bearer()?;
        let response = self
            .http
            .post(format!("{}{path}", self.api_url))
            .header("Content-Type", JSON_API_CONTENT_TYPE)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// PATCH the job status attribute.
    pub async fn update_job_status(&self, org_id: &str, job_id: i64, status: &str) -> Result<()> {
        debug!(org_id, job_id, status, "updating job status");
        self.patch(
            &format!("/api/v1/organization/{org_id}/job/{job_id}"),
            json!({
                "data": {
                    "type": "job",
                    "id": job_id.to_string(),
                    "attributes": { "status": status }
                }
            }),
        )
        .await
    }

    /// PATCH the step status, attaching the log output URL.
    pub async fn update_step_status(
        &self,
        org_id: &str,
        job_id: i64,
        step_id: &str,
        status: &str,
        output_url: &str,
    ) -> Result<()> {
        debug!(org_id, job_id, step_id, status, "updating step status");
        self.patch(
            &format!("/api/v1/organization/{org_id}/job/{job_id}/step/{step_id}"),
            json!({
                "data": {
                    "type": "step",
                    "id": step_id,
                    "attributes": { "status": status, "output": output_url }
                }
            }),
        )
        .await
    }

    /// PATCH the commit the job is executing.
    pub async fn update_job_commit_id(
        &self,
        org_id: &str,
        job_id: i64,
        commit_id: &str,
    ) -> Result<()> {
        self.patch(
            &format!("/api/v1/organization/{org_id}/job/{job_id}"),
            json!({
                "data": {
                    "type": "job",
                    "id": job_id.to_string(),
                    "attributes": { "commitId": commit_id }
                }
            }),
        )
        .await
    }

    /// POST a history record pointing at the uploaded state.
    pub async fn create_history(
        &self,
        org_id: &str,
        workspace_id: &str,
        job_id: i64,
        state_url: &str,
    ) -> Result<()> {
        self.post(
            &format!("/api/v1/organization/{org_id}/workspace/{workspace_id}/history"),
            json!({
                "data": {
                    "type": "history",
                    "attributes": {
                        "output": state_url,
                        "jobReference": job_id.to_string()
                    }
                }
            }),
        )
        .await
    }

    /// Fetch the access token of a VCS identity.
    pub async fn get_vcs_token(&self, org_id: &str, vcs_id: &str) -> Result<String> {
        let token = self.bearer()?;
        let response = self
            .http
            .get(format!(
                "{}/api/v1/organization/{org_id}/vcs/{vcs_id}",
                self.api_url
            ))
            .header("Content-Type", JSON_API_CONTENT_TYPE)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let response = Self::check(response).await?;

        let document: Value = response
            .json()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;
        Ok(document["data"]["attributes"]["accessToken"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    /// GET an API path verbatim and relay the JSON document. Used by the
    /// registry to proxy provider discovery.
    pub async fn proxy_get(&self, path: &str) -> Result<Value> {
        let token = self.bearer()?;
        let response = self
            .http
            .get(format!("{}{path}", self.api_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Decode(e.to_string()))
    }
}
