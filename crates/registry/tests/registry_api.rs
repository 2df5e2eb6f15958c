//! HTTP-level tests for the registry router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use terrakube_registry::{router, RegistryState};
use terrakube_storage::NopStorage;
use tower::ServiceExt;

fn state_with(configure: impl FnOnce(&mut terrakube_core::Config)) -> Arc<RegistryState> {
    let mut config = terrakube_core::Config::from_env().unwrap();
    config.auth_validation_type = String::new();
    config.app_client_id = String::new();
    config.issuer_uri = String::new();
    configure(&mut config);

    let storage = Arc::new(NopStorage::new("https://registry.example.io".to_string()));
    Arc::new(RegistryState::new(config, storage))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoints_report_up() {
    let app = router(state_with(|_| {}));

    for path in [
        "/health",
        "/actuator/health",
        "/actuator/health/liveness",
        "/actuator/health/readiness",
    ] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "path {path}");
        let body = body_json(response).await;
        assert_eq!(body["status"], "UP");
    }
}

#[tokio::test]
async fn test_well_known_discovery_document() {
    let app = router(state_with(|config| {
        config.api_url = "https://api.example.io".to_string();
    }));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/.well-known/terraform.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["modules.v1"], "/terraform/modules/v1/");
    assert_eq!(body["providers.v1"], "/terraform/providers/v1/");
    assert_eq!(body["tfe.v2"], "https://api.example.io/remote/tfe/v2/");
    assert_eq!(body["tfe.v2.1"], "https://api.example.io/remote/tfe/v2/");
    assert!(body.get("login.v1").is_none());
}

#[tokio::test]
async fn test_well_known_advertises_login_when_oidc_configured() {
    let app = router(state_with(|config| {
        config.app_client_id = "terrakube-cli".to_string();
        config.issuer_uri = "https://dex.example.io/dex".to_string();
    }));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/.well-known/terraform.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;

    let login = &body["login.v1"];
    assert_eq!(login["client"], "terrakube-cli");
    assert_eq!(login["token"], "https://dex.example.io/dex/token");
    assert_eq!(login["ports"], serde_json::json!([10000, 10001]));
}

#[tokio::test]
async fn test_protected_endpoint_requires_bearer() {
    let app = router(state_with(|config| {
        config.auth_validation_type = "DEX".to_string();
    }));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/terraform/modules/v1/acme/vpc/aws/versions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_garbage_bearer_is_rejected() {
    let app = router(state_with(|config| {
        config.auth_validation_type = "DEX".to_string();
    }));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/terraform/modules/v1/acme/vpc/aws/versions")
                .header("Authorization", "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_module_zip_endpoint_is_public() {
    // No auth header even with validation enabled; the nop backend cannot
    // serve the artifact, so the handler reports a server-side failure
    // rather than a 401.
    let app = router(state_with(|config| {
        config.auth_validation_type = "DEX".to_string();
    }));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/terraform/modules/v1/download/acme/vpc/aws/1.2.3/module.zip")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
