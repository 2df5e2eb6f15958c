//! TFE-compatible remote state endpoints.
//!
//! A small subset of the Terraform Enterprise v2 API, enough for
//! `backend "remote"` workflows: workspace lookup, state-version creation
//! and hosted state upload/download. History and archive bookkeeping lives
//! in the relational store; state bytes live in object storage.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use terrakube_storage::StorageService;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct StateApi {
    pub pool: PgPool,
    pub hostname: String,
    pub storage: Arc<dyn StorageService>,
}

impl StateApi {
    pub fn router(self) -> Router {
        Router::new()
            .route("/remote/tfe/v2/ping", get(ping))
            .route("/remote/tfe/v2/workspaces", get(find_workspace))
            .route("/remote/tfe/v2/state-versions", post(create_state_version))
            .route(
                "/tfstate/v1/archive/:archive_id/terraform.tfstate",
                put(upload_hosted_state),
            )
            .route(
                "/tfstate/v1/organization/:org/workspace/:workspace/state/:file",
                get(download_state),
            )
            .with_state(Arc::new(self))
    }
}

async fn ping() -> StatusCode {
    StatusCode::OK
}

/// `GET /remote/tfe/v2/workspaces?search[name]=<name>` — the CLI's workspace
/// lookup.
async fn find_workspace(
    State(api): State<Arc<StateApi>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(name) = params.get("search[name]").filter(|name| !name.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "search[name] required").into_response();
    };

    let row: Option<(String, String, bool, Option<String>)> = match sqlx::query_as(
        "SELECT w.id::text, w.organization_id::text, w.locked, w.terraform_version
         FROM workspace w WHERE w.name = $1 AND w.deleted = false LIMIT 1",
    )
    .bind(name)
    .fetch_optional(&api.pool)
    .await
    {
        Ok(row) => row,
        Err(e) => {
            error!("workspace lookup failed: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let Some((workspace_id, _organization_id, locked, terraform_version)) = row else {
        return (StatusCode::NOT_FOUND, "Workspace not found").into_response();
    };

    let document = json!({
        "data": [{
            "id": workspace_id,
            "type": "workspaces",
            "attributes": {
                "name": name,
                "locked": locked,
                "terraform-version": terraform_version.unwrap_or_default(),
                "permissions": {
                    "can-queue-run": true,
                    "can-lock": true,
                    "can-unlock": true,
                    "can-read-state": true,
                },
            },
        }],
    });
    Json(document).into_response()
}

/// `POST /remote/tfe/v2/state-versions` — creates the history row plus a
/// one-shot archive row whose id gates the upcoming state upload.
async fn create_state_version(
    State(api): State<Arc<StateApi>>,
    Json(body): Json<Value>,
) -> Response {
    let attributes = &body["data"]["attributes"];
    let serial = attributes["serial"].as_i64().unwrap_or(0);
    let md5 = attributes["md5"].as_str().unwrap_or_default();
    let lineage = attributes["lineage"].as_str().unwrap_or_default();
    let workspace_id = body["data"]["relationships"]["workspace"]["data"]["id"]
        .as_str()
        .unwrap_or_default();
    if workspace_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "workspace relationship required").into_response();
    }

    let history_id = Uuid::new_v4();
    let archive_id = Uuid::new_v4();

    if let Err(e) = sqlx::query(
        "INSERT INTO history (id, workspace_id, serial, md5, lineage, job_reference, output)
         VALUES ($1, $2::uuid, $3, $4, $5, '', '')",
    )
    .bind(history_id)
    .bind(workspace_id)
    .bind(serial)
    .bind(md5)
    .bind(lineage)
    .execute(&api.pool)
    .await
    {
        error!("error creating history: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create state version")
            .into_response();
    }

    if let Err(e) =
        sqlx::query("INSERT INTO temp_archive (id, type, history_id) VALUES ($1, 'state', $2)")
            .bind(archive_id)
            .bind(history_id)
            .execute(&api.pool)
            .await
    {
        error!("error creating archive: {e}");
    }

    let upload_url = format!(
        "https://{}/tfstate/v1/archive/{archive_id}/terraform.tfstate",
        api.hostname
    );
    let document = json!({
        "data": {
            "id": history_id.to_string(),
            "type": "state-versions",
            "attributes": {
                "upload-url": upload_url,
                "hosted-state-upload-url": upload_url,
                "serial": serial,
            },
        },
    });
    (StatusCode::CREATED, Json(document)).into_response()
}

/// `PUT /tfstate/v1/archive/:archive_id/terraform.tfstate`
async fn upload_hosted_state(
    State(api): State<Arc<StateApi>>,
    Path(archive_id): Path<String>,
    body: Bytes,
) -> Response {
    let row: Option<(String, String, String)> = match sqlx::query_as(
        "SELECT a.history_id::text, o.id::text, w.id::text
         FROM temp_archive a
         JOIN history h ON a.history_id = h.id
         JOIN workspace w ON h.workspace_id = w.id
         JOIN organization o ON w.organization_id = o.id
         WHERE a.id = $1::uuid",
    )
    .bind(&archive_id)
    .fetch_optional(&api.pool)
    .await
    {
        Ok(row) => row,
        Err(e) => {
            error!(%archive_id, "archive lookup failed: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let Some((history_id, organization_id, workspace_id)) = row else {
        // Unknown archive ids are treated as a permission failure, matching
        // the TFE behavior the CLI expects.
        return (StatusCode::FORBIDDEN, "Archive not found").into_response();
    };

    let key = format!("tfstate/{organization_id}/{workspace_id}/{history_id}.tfstate");
    if let Err(e) = api.storage.upload(&key, body.clone()).await {
        error!(%archive_id, "error uploading state: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to upload state").into_response();
    }
    info!(
        %organization_id,
        %workspace_id,
        %history_id,
        bytes = body.len(),
        "hosted state uploaded"
    );

    let state_hash = format!("{:x}", md5::compute(&body));
    let output_url = format!(
        "https://{}/tfstate/v1/organization/{organization_id}/workspace/{workspace_id}/state/{history_id}.json",
        api.hostname
    );
    if let Err(e) = sqlx::query("UPDATE history SET output = $1, md5 = $2 WHERE id = $3::uuid")
        .bind(&output_url)
        .bind(&state_hash)
        .bind(&history_id)
        .execute(&api.pool)
        .await
    {
        warn!(%history_id, "error updating history: {e}");
    }

    if let Err(e) = sqlx::query("DELETE FROM temp_archive WHERE id = $1::uuid")
        .bind(&archive_id)
        .execute(&api.pool)
        .await
    {
        warn!(%archive_id, "error deleting archive row: {e}");
    }

    StatusCode::CREATED.into_response()
}

/// `GET /tfstate/v1/organization/:org/workspace/:ws/state/:file`
async fn download_state(
    State(api): State<Arc<StateApi>>,
    Path((organization_id, workspace_id, file)): Path<(String, String, String)>,
) -> Response {
    let key = format!("tfstate/{organization_id}/{workspace_id}/{file}");
    match api.storage.download(&key).await {
        Ok(data) => (
            StatusCode::OK,
            [("Content-Type", "application/json")],
            axum::body::Body::from(data),
        )
            .into_response(),
        Err(e) if e.is_not_found() => (StatusCode::NOT_FOUND, "State not found").into_response(),
        Err(e) => {
            error!(%key, "error reading state: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
