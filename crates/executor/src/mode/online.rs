//! Online mode: HTTP webhook accepting jobs from the control plane.

use crate::processor::JobProcessor;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use terrakube_core::model::Job;
use tokio::sync::Semaphore;
use tracing::{error, info};

#[derive(Clone)]
struct AppState {
    processor: Arc<JobProcessor>,
    /// Admission cap so a burst of webhooks cannot start more IaC processes
    /// than the host can run.
    limiter: Arc<Semaphore>,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "UP" }))
}

async fn submit(State(state): State<AppState>, Json(job): Json<Job>) -> (StatusCode, Json<Job>) {
    info!(job_id = job.job_id, step_id = %job.step_id, "accepted job");
    let echo = job.clone();

    tokio::spawn(run_job(state, job));

    (StatusCode::ACCEPTED, Json(echo))
}

/// Supervises one job task. A panic inside the processor is caught at this
/// boundary and reported as a failed job instead of crashing the server.
async fn run_job(state: AppState, job: Job) {
    let _permit = state
        .limiter
        .acquire()
        .await
        .expect("job limiter never closes");

    let processor = state.processor.clone();
    let task_job = job.clone();
    let handle = tokio::spawn(async move { processor.process(task_job).await });

    match handle.await {
        Ok(Ok(())) => {}
        // The processor already reported its own failure.
        Ok(Err(e)) => error!(job_id = job.job_id, "job execution failed: {e}"),
        Err(join_error) => {
            let message = if join_error.is_panic() {
                format!("Internal executor error: {join_error}")
            } else {
                format!("job task aborted: {join_error}")
            };
            error!(job_id = job.job_id, "{message}");
            if let Err(e) = state
                .processor
                .reporter()
                .set_completed(&job, false, &message)
                .await
            {
                error!(job_id = job.job_id, "failed to report panic as job failure: {e}");
            }
        }
    }
}

/// Serve the executor webhook until the process is stopped.
pub async fn serve(port: &str, processor: Arc<JobProcessor>) -> crate::Result<()> {
    let permits = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let state = AppState {
        processor,
        limiter: Arc::new(Semaphore::new(permits)),
    };

    let app = Router::new()
        .route("/api/v1/terraform-rs", post(submit))
        .route("/health", get(health))
        .route("/actuator/health", get(health))
        .route("/actuator/health/liveness", get(health))
        .route("/actuator/health/readiness", get(health))
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    info!(%addr, permits, "executor listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(crate::Error::Io)?;
    Ok(())
}
