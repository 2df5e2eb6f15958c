//! Executor dispatch backends.
//!
//! Inline dispatch runs the job processor in this process; ephemeral
//! dispatch packages the execution context into a one-shot Kubernetes Job
//! whose pod receives its entire input as a base64 env var.

use crate::scheduler::ExecutionContext;
use async_trait::async_trait;
use base64::Engine;
use k8s_openapi::api::batch::v1::Job as K8sJob;
use kube::api::PostParams;
use kube::Api;
use std::collections::BTreeMap;
use std::sync::Arc;
use terrakube_executor::JobProcessor;
use tracing::info;

/// How long a finished worker lingers before Kubernetes reaps it.
const WORKER_TTL_SECONDS: i32 = 30;

/// Executes one job's pending step.
#[async_trait]
pub trait DispatchBackend: Send + Sync {
    async fn dispatch(&self, context: &ExecutionContext) -> anyhow::Result<()>;
}

/// Runs jobs on the in-process executor.
pub struct InlineDispatcher {
    processor: Arc<JobProcessor>,
}

impl InlineDispatcher {
    pub fn new(processor: Arc<JobProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl DispatchBackend for InlineDispatcher {
    async fn dispatch(&self, context: &ExecutionContext) -> anyhow::Result<()> {
        self.processor.process(context.clone().into_job()).await?;
        Ok(())
    }
}

/// Settings for the ephemeral worker backend.
#[derive(Debug, Clone, Default)]
pub struct EphemeralConfig {
    pub namespace: String,
    pub image: String,
    /// Secret whose entries become the worker's environment.
    pub secret_name: String,
    pub service_account: String,
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<serde_json::Value>,
}

/// Creates one Kubernetes Job per dispatched step.
pub struct EphemeralDispatcher {
    client: kube::Client,
    config: EphemeralConfig,
}

impl EphemeralDispatcher {
    pub async fn new(config: EphemeralConfig) -> anyhow::Result<Self> {
        let client = kube::Client::try_default().await?;
        Ok(Self { client, config })
    }

    fn worker_name(context: &ExecutionContext) -> String {
        let step_prefix: String = context.step_id.chars().take(8).collect();
        format!("terrakube-job-{}-{}", context.job_id, step_prefix)
    }

    fn worker_spec(&self, context: &ExecutionContext) -> anyhow::Result<K8sJob> {
        // The worker boots in batch mode and expects the executor's job
        // payload, not the scheduler-internal context shape.
        let payload = base64::engine::general_purpose::STANDARD
            .encode(serde_json::to_vec(&context.clone().into_job())?);

        let env = vec![
            serde_json::json!({ "name": "EphemeralFlagBatch", "value": "true" }),
            serde_json::json!({ "name": "EphemeralJobData", "value": payload }),
        ];
        let mut env_from = Vec::new();
        if !self.config.secret_name.is_empty() {
            env_from.push(serde_json::json!({
                "secretRef": { "name": self.config.secret_name }
            }));
        }

        let mut pod_spec = serde_json::json!({
            "restartPolicy": "Never",
            "containers": [{
                "name": "terrakube-executor",
                "image": self.config.image,
                "env": env,
                "envFrom": env_from,
            }],
        });
        if !self.config.service_account.is_empty() {
            pod_spec["serviceAccountName"] = serde_json::json!(self.config.service_account);
        }
        if !self.config.node_selector.is_empty() {
            pod_spec["nodeSelector"] = serde_json::json!(self.config.node_selector);
        }
        if !self.config.tolerations.is_empty() {
            pod_spec["tolerations"] = serde_json::json!(self.config.tolerations);
        }

        let job = serde_json::json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": Self::worker_name(context),
                "namespace": self.config.namespace,
                "labels": {
                    "terrakube.io/organization": context.organization_id,
                    "terrakube.io/workspace": context.workspace_id,
                },
            },
            "spec": {
                "ttlSecondsAfterFinished": WORKER_TTL_SECONDS,
                "backoffLimit": 0,
                "template": { "spec": pod_spec },
            },
        });

        Ok(serde_json::from_value(job)?)
    }
}

#[async_trait]
impl DispatchBackend for EphemeralDispatcher {
    async fn dispatch(&self, context: &ExecutionContext) -> anyhow::Result<()> {
        let job = self.worker_spec(context)?;
        let api: Api<K8sJob> = Api::namespaced(self.client.clone(), &self.config.namespace);
        api.create(&PostParams::default(), &job).await?;
        info!(
            job_id = context.job_id,
            worker = %Self::worker_name(context),
            namespace = %self.config.namespace,
            "ephemeral worker created"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        ExecutionContext {
            organization_id: "org-uuid".into(),
            workspace_id: "ws-uuid".into(),
            job_id: 12,
            step_id: "0a1b2c3d-4444-5555-6666-777788889999".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_worker_name_truncates_step() {
        assert_eq!(
            EphemeralDispatcher::worker_name(&context()),
            "terrakube-job-12-0a1b2c3d"
        );
    }

    #[tokio::test]
    async fn test_worker_spec_shape() {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let dispatcher = EphemeralDispatcher {
            // The spec builder never talks to the cluster.
            client: kube::Client::try_from(kube::Config::new("http://localhost:8001".parse().unwrap()))
                .unwrap(),
            config: EphemeralConfig {
                namespace: "terrakube".into(),
                image: "terrakube/executor:2.0".into(),
                secret_name: "terrakube-env".into(),
                service_account: "terrakube-executor".into(),
                ..Default::default()
            },
        };

        let job = dispatcher.worker_spec(&context()).unwrap();
        let spec = job.spec.expect("job spec");
        assert_eq!(spec.ttl_seconds_after_finished, Some(30));

        let pod_spec = spec.template.spec.expect("pod spec");
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(
            pod_spec.service_account_name.as_deref(),
            Some("terrakube-executor")
        );

        let container = &pod_spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("terrakube/executor:2.0"));
        let env = container.env.as_ref().expect("env");
        assert!(env
            .iter()
            .any(|var| var.name == "EphemeralFlagBatch"
                && var.value.as_deref() == Some("true")));

        // The inlined payload is the executor's job document.
        let payload = env
            .iter()
            .find(|var| var.name == "EphemeralJobData")
            .and_then(|var| var.value.clone())
            .expect("job payload");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        let job_payload: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(job_payload["jobId"], 12);
        assert_eq!(job_payload["organizationId"], "org-uuid");
        assert!(job_payload["type"].is_string());

        let labels = job.metadata.labels.expect("labels");
        assert_eq!(labels["terrakube.io/organization"], "org-uuid");
    }
}
