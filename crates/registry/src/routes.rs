//! Registry HTTP handlers.

use crate::RegistryState;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;
use terrakube_storage::{ModuleCoordinate, ModuleSource};
use tracing::{error, warn};

type HandlerResult = std::result::Result<Response, ErrorResponse>;

/// JSON error payload with a status code.
pub struct ErrorResponse {
    status: StatusCode,
    message: String,
}

impl ErrorResponse {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "UP" }))
}

/// Terraform service discovery document. `login.v1` is advertised only when
/// an OIDC client is configured.
pub async fn well_known(State(state): State<Arc<RegistryState>>) -> Json<Value> {
    let config = &state.config;
    let api = config.api_url.trim_end_matches('/');
    let mut document = json!({
        "modules.v1": "/terraform/modules/v1/",
        "providers.v1": "/terraform/providers/v1/",
        "tfe.v2": format!("{api}/remote/tfe/v2/"),
        "tfe.v2.1": format!("{api}/remote/tfe/v2/"),
        "motd.v1": format!("{api}/remote/tfe/v2/motd"),
    });

    if !config.app_client_id.is_empty() && !config.issuer_uri.is_empty() {
        document["login.v1"] = json!({
            "client": config.app_client_id,
            "grant_types": ["authz_code", "openid", "profile", "email", "offline_access", "groups"],
            "authz": format!(
                "{}/auth?scope=openid+profile+email+offline_access+groups",
                config.issuer_uri
            ),
            "token": format!("{}/token", config.issuer_uri),
            "ports": [10000, 10001],
        });
    }

    Json(document)
}

/// Bearer-token gate for the protected endpoints. LOCAL (or unset)
/// validation mode leaves the registry open.
pub async fn require_bearer(
    State(state): State<Arc<RegistryState>>,
    request: Request,
    next: Next,
) -> Response {
    let validation_type = &state.config.auth_validation_type;
    if validation_type.is_empty() || validation_type == "LOCAL" {
        return next.run(request).await;
    }

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let Some(token) = header_value.strip_prefix("Bearer ") else {
        return ErrorResponse::new(StatusCode::UNAUTHORIZED, "Bearer token required")
            .into_response();
    };

    match terrakube_auth::validate_token(
        token,
        &state.config.internal_secret,
        &state.config.pat_secret,
        &state.config.issuer_uri,
        &state.jwks,
    )
    .await
    {
        Ok(_) => next.run(request).await,
        Err(e) => {
            warn!("token validation failed: {e}");
            ErrorResponse::new(StatusCode::UNAUTHORIZED, format!("Invalid token: {e}"))
                .into_response()
        }
    }
}

/// `GET /terraform/modules/v1/:org/:name/:provider/versions`
pub async fn module_versions(
    State(state): State<Arc<RegistryState>>,
    Path((org, name, provider)): Path<(String, String, String)>,
) -> HandlerResult {
    let cache_key = format!("{org}/{name}/{provider}");
    if let Some(document) = state.version_cache.get(&cache_key).await {
        return Ok(Json(document).into_response());
    }

    let versions = state
        .client
        .get_module_versions(&org, &name, &provider)
        .await
        .map_err(|e| {
            error!("error fetching versions: {e}");
            ErrorResponse::internal("Failed to fetch versions")
        })?;

    let version_entries: Vec<Value> = versions
        .iter()
        .map(|version| json!({ "version": version }))
        .collect();
    let document = json!({ "modules": [ { "versions": version_entries } ] });

    state.version_cache.set(cache_key, document.clone()).await;
    Ok(Json(document).into_response())
}

/// `GET /terraform/modules/v1/:org/:name/:provider/:version/download`
///
/// Responds `204 No Content` with the zip location in `X-Terraform-Get`,
/// packaging the module on first request.
pub async fn module_download(
    State(state): State<Arc<RegistryState>>,
    Path((org, name, provider, version)): Path<(String, String, String, String)>,
) -> HandlerResult {
    let coordinate = ModuleCoordinate {
        organization: org.clone(),
        name: name.clone(),
        provider: provider.clone(),
        version: version.clone(),
    };

    let cache_key = format!("{org}/{name}/{provider}/{version}");
    if let Some(url) = state.download_cache.get(&cache_key).await {
        return Ok(no_content_with_get(&url));
    }

    let module = state
        .client
        .get_module(&org, &name, &provider)
        .await
        .map_err(|e| {
            error!("error fetching module details: {e}");
            ErrorResponse::new(StatusCode::NOT_FOUND, "Module not found")
        })?;

    let source = resolve_module_source(&state, module).await;

    let url = state
        .storage
        .search_module(&coordinate, &source)
        .await
        .map_err(|e| {
            error!("error packaging module: {e}");
            ErrorResponse::internal("Failed to process module download")
        })?;

    state.download_cache.set(cache_key, url.clone()).await;
    Ok(no_content_with_get(&url))
}

/// Pick the module's credentials: a VCS identity wins, then an SSH identity,
/// otherwise the source is treated as public.
async fn resolve_module_source(
    state: &RegistryState,
    module: terrakube_client::ModuleDefinition,
) -> ModuleSource {
    let mut source = ModuleSource {
        source: module.source,
        vcs_type: "PUBLIC".to_string(),
        access_token: String::new(),
        tag_prefix: module.tag_prefix,
        folder: module.folder,
    };

    if !module.vcs_id.is_empty() {
        source.vcs_type = module.vcs_type;
        match state
            .client
            .get_vcs_token(&module.organization_id, &module.vcs_id)
            .await
        {
            Ok(token) => source.access_token = token,
            Err(e) => warn!(vcs_id = %module.vcs_id, "failed to fetch VCS token: {e}"),
        }
    } else if !module.ssh_private_key.is_empty() {
        source.vcs_type = format!("SSH~{}", module.ssh_type);
        source.access_token = module.ssh_private_key;
    }

    source
}

fn no_content_with_get(url: &str) -> Response {
    (
        StatusCode::NO_CONTENT,
        [("X-Terraform-Get", url.to_string())],
    )
        .into_response()
}

/// `GET /terraform/modules/v1/download/.../module.zip` — public; the
/// Terraform CLI fetches it without auth.
pub async fn module_zip(
    State(state): State<Arc<RegistryState>>,
    Path((org, name, provider, version)): Path<(String, String, String, String)>,
) -> HandlerResult {
    let coordinate = ModuleCoordinate {
        organization: org.clone(),
        name: name.clone(),
        provider: provider.clone(),
        version: version.clone(),
    };

    let data = state
        .storage
        .download_module(&coordinate)
        .await
        .map_err(|e| {
            error!("error downloading module zip: {e}");
            ErrorResponse::internal("Failed to download module zip")
        })?;

    let disposition = format!("attachment; filename=\"{org}-{name}-{provider}-{version}.zip\"");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), "application/zip".to_string()),
            (header::CONTENT_DISPOSITION.as_str(), disposition),
        ],
        Body::from(data),
    )
        .into_response())
}

/// `GET /terraform/readme/v1/:org/:name/:provider/:version/download`
pub async fn module_readme(
    State(state): State<Arc<RegistryState>>,
    Path((org, name, provider, version)): Path<(String, String, String, String)>,
) -> HandlerResult {
    let coordinate = ModuleCoordinate {
        organization: org,
        name,
        provider,
        version,
    };
    let zip_url = format!(
        "{}/{}",
        state.storage.registry_base_url().trim_end_matches('/'),
        coordinate.download_path()
    );

    let data = match state.storage.download_module(&coordinate).await {
        Ok(data) => data,
        // Not yet packaged: point the client at the zip endpoint instead.
        Err(_) => return Ok(no_content_with_get(&zip_url)),
    };

    let readme = terrakube_storage::extract_readme(&data).unwrap_or_default();
    Ok(Json(json!({
        "content": base64::engine::general_purpose::STANDARD.encode(readme),
        "url": zip_url,
    }))
    .into_response())
}

/// `GET /terraform/providers/v1/:org/:provider/versions` — proxied to the
/// control-plane API.
pub async fn provider_versions(
    State(state): State<Arc<RegistryState>>,
    Path((org, provider)): Path<(String, String)>,
) -> HandlerResult {
    let document = state
        .client
        .proxy_get(&format!("/terraform/providers/v1/{org}/{provider}/versions"))
        .await
        .map_err(|e| {
            error!("error fetching provider versions: {e}");
            ErrorResponse::internal("Failed to fetch provider versions")
        })?;
    Ok(Json(document).into_response())
}

/// `GET /terraform/providers/v1/:org/:provider/:version/download/:os/:arch`
pub async fn provider_download(
    State(state): State<Arc<RegistryState>>,
    Path((org, provider, version, os, arch)): Path<(String, String, String, String, String)>,
) -> HandlerResult {
    let document = state
        .client
        .proxy_get(&format!(
            "/terraform/providers/v1/{org}/{provider}/{version}/download/{os}/{arch}"
        ))
        .await
        .map_err(|e| {
            error!("error fetching provider file info: {e}");
            ErrorResponse::internal("Failed to fetch provider file info")
        })?;
    Ok(Json(document).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrakube_client::ModuleDefinition;

    fn state() -> Arc<RegistryState> {
        let config = terrakube_core::Config::from_env().unwrap();
        let storage = Arc::new(terrakube_storage::NopStorage::new(
            "https://registry.example.io".to_string(),
        ));
        Arc::new(RegistryState::new(config, storage))
    }

    #[tokio::test]
    async fn test_well_known_without_login() {
        let state = state();
        let Json(document) = well_known(State(state)).await;
        assert_eq!(document["modules.v1"], "/terraform/modules/v1/");
        assert_eq!(document["providers.v1"], "/terraform/providers/v1/");
        assert!(document.get("login.v1").is_none());
        assert!(document["tfe.v2"].as_str().unwrap().ends_with("/remote/tfe/v2/"));
    }

    #[tokio::test]
    async fn test_resolve_module_source_ssh_identity() {
        let state = state();
        let module = ModuleDefinition {
            source: "git@github.com:acme/vpc.git".into(),
            ssh_type: "rsa".into(),
            ssh_private_key: "-----BEGIN KEY-----".into(),
            ..Default::default()
        };

        let source = resolve_module_source(&state, module).await;
        assert_eq!(source.vcs_type, "SSH~rsa");
        assert_eq!(source.access_token, "-----BEGIN KEY-----");
    }

    #[tokio::test]
    async fn test_resolve_module_source_public_default() {
        let state = state();
        let module = ModuleDefinition {
            source: "https://github.com/acme/vpc.git".into(),
            ..Default::default()
        };

        let source = resolve_module_source(&state, module).await;
        assert_eq!(source.vcs_type, "PUBLIC");
        assert!(source.access_token.is_empty());
    }

    #[test]
    fn test_no_content_with_get_header() {
        let response = no_content_with_get("https://r.example/module.zip");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers().get("X-Terraform-Get").unwrap(),
            "https://r.example/module.zip"
        );
    }
}
