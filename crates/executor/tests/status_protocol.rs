//! Status reporting protocol: per job the executor issues exactly one
//! running transition and exactly one terminal transition, verified against
//! a recording control-plane stub.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::Router;
use base64::Engine;
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use terrakube_client::ControlPlaneClient;
use terrakube_core::model::{Command as JobCommand, Job, JobType};
use terrakube_core::Config;
use terrakube_executor::{JobProcessor, StatusReporter};
use terrakube_storage::{NopStorage, StorageService};

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    body: Value,
}

type Records = Arc<Mutex<Vec<Recorded>>>;

async fn record(State(records): State<Records>, request: Request) -> StatusCode {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let bytes = axum::body::to_bytes(request.into_body(), 1024 * 1024)
        .await
        .unwrap_or_default();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    records.lock().unwrap().push(Recorded { method, path, body });
    StatusCode::OK
}

async fn spawn_stub_api() -> (String, Records) {
    let records: Records = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .fallback(record)
        .with_state(records.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}"), records)
}

fn internal_secret() -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"0123456789abcdef0123456789abcdef")
}

fn git(args: &[&str], dir: &Path) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.io")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.io")
        .status()
        .expect("git runs");
    assert!(status.success(), "git {args:?}");
}

fn seed_repository(dir: &Path) {
    git(&["init", "--initial-branch=main", "."], dir);
    std::fs::write(dir.join("main.tf"), "# empty\n").unwrap();
    git(&["add", "."], dir);
    git(&["commit", "-m", "seed"], dir);
}

fn step_statuses(records: &Records) -> Vec<String> {
    records
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.method == "PATCH" && r.path.contains("/step/"))
        .filter_map(|r| r.body["data"]["attributes"]["status"].as_str().map(String::from))
        .collect()
}

#[tokio::test]
async fn test_successful_job_reports_running_then_completed() {
    let (api_url, records) = spawn_stub_api().await;

    let repo = tempfile::tempdir().unwrap();
    seed_repository(repo.path());

    let storage: Arc<dyn StorageService> = Arc::new(NopStorage::new(String::new()));
    let client = ControlPlaneClient::new(api_url, internal_secret());
    let processor = JobProcessor::new(
        Config::from_env().unwrap(),
        StatusReporter::new(client, storage.clone()),
        storage,
    );

    let job = Job {
        job_id: 1,
        step_id: "step-1".into(),
        organization_id: "org".into(),
        workspace_id: "ws".into(),
        job_type: JobType::CustomScripts,
        source: format!("file://{}", repo.path().display()),
        branch: "main".into(),
        vcs_type: "PUBLIC".into(),
        command_list: vec![JobCommand {
            priority: 10,
            script: "true".into(),
            ..Default::default()
        }],
        ..Default::default()
    };

    processor.process(job).await.unwrap();

    let statuses = step_statuses(&records);
    assert_eq!(statuses, vec!["running", "completed"]);

    // The commit id of the checkout was reported on the job itself.
    let commit_patch = records
        .lock()
        .unwrap()
        .iter()
        .any(|r| {
            r.method == "PATCH"
                && !r.path.contains("/step/")
                && r.body["data"]["attributes"]["commitId"].is_string()
        });
    assert!(commit_patch, "expected a commitId patch");
}

#[tokio::test]
async fn test_failed_job_reports_running_then_failed() {
    let (api_url, records) = spawn_stub_api().await;

    let repo = tempfile::tempdir().unwrap();
    seed_repository(repo.path());

    let storage: Arc<dyn StorageService> = Arc::new(NopStorage::new(String::new()));
    let client = ControlPlaneClient::new(api_url, internal_secret());
    let processor = JobProcessor::new(
        Config::from_env().unwrap(),
        StatusReporter::new(client, storage.clone()),
        storage,
    );

    let job = Job {
        job_id: 2,
        step_id: "step-2".into(),
        organization_id: "org".into(),
        workspace_id: "ws".into(),
        job_type: JobType::CustomScripts,
        source: format!("file://{}", repo.path().display()),
        branch: "main".into(),
        vcs_type: "PUBLIC".into(),
        command_list: vec![JobCommand {
            priority: 10,
            script: "exit 5".into(),
            ..Default::default()
        }],
        ..Default::default()
    };

    processor.process(job).await.unwrap_err();

    let statuses = step_statuses(&records);
    assert_eq!(statuses, vec!["running", "failed"]);
}
