//! Module and provider registry, compatible with the Terraform/OpenTofu
//! registry discovery protocol.

mod cache;
mod routes;

pub use cache::TtlCache;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::{middleware, Router};
use std::sync::Arc;
use std::time::Duration;
use terrakube_auth::JwksCache;
use terrakube_client::ControlPlaneClient;
use terrakube_core::Config;
use terrakube_storage::StorageService;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

/// Lookup results are cached for ten minutes; version republish is the only
/// invalidation event and it is rare.
const LOOKUP_CACHE_TTL: Duration = Duration::from_secs(600);

/// Shared state of the registry service.
pub struct RegistryState {
    pub config: Config,
    pub client: ControlPlaneClient,
    pub storage: Arc<dyn StorageService>,
    pub jwks: JwksCache,
    /// Version list documents by `org/name/provider`.
    pub version_cache: TtlCache<serde_json::Value>,
    /// Resolved zip URLs by `org/name/provider/version`.
    pub download_cache: TtlCache<String>,
}

impl RegistryState {
    pub fn new(config: Config, storage: Arc<dyn StorageService>) -> Self {
        let client =
            ControlPlaneClient::new(config.api_url.clone(), config.internal_secret.clone());
        Self {
            config,
            client,
            storage,
            jwks: JwksCache::new(),
            version_cache: TtlCache::new(LOOKUP_CACHE_TTL),
            download_cache: TtlCache::new(LOOKUP_CACHE_TTL),
        }
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers([
            axum::http::HeaderName::from_static("x-terraform-get"),
            axum::http::header::CONTENT_DISPOSITION,
        ]);

    if config.ui_url.is_empty() {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .ui_url
            .split(',')
            .filter_map(|origin| origin.trim().parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

/// Build the registry router.
pub fn router(state: Arc<RegistryState>) -> Router {
    let cors = cors_layer(&state.config);

    let protected = Router::new()
        .route(
            "/terraform/modules/v1/:org/:name/:provider/versions",
            get(routes::module_versions),
        )
        .route(
            "/terraform/modules/v1/:org/:name/:provider/:version/download",
            get(routes::module_download),
        )
        .route(
            "/terraform/readme/v1/:org/:name/:provider/:version/download",
            get(routes::module_readme),
        )
        .route(
            "/terraform/providers/v1/:org/:provider/versions",
            get(routes::provider_versions),
        )
        .route(
            "/terraform/providers/v1/:org/:provider/:version/download/:os/:arch",
            get(routes::provider_download),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            routes::require_bearer,
        ));

    Router::new()
        .route("/health", get(routes::health))
        .route("/actuator/health", get(routes::health))
        .route("/actuator/health/liveness", get(routes::health))
        .route("/actuator/health/readiness", get(routes::health))
        .route("/.well-known/terraform.json", get(routes::well_known))
        .route(
            "/terraform/modules/v1/download/:org/:name/:provider/:version/module.zip",
            get(routes::module_zip),
        )
        .merge(protected)
        .layer(cors)
        .with_state(state)
}

/// Serve the registry until the process is stopped.
pub async fn start(config: Config) -> std::io::Result<()> {
    let storage = terrakube_storage::from_config(&config)
        .await
        .map_err(std::io::Error::other)?;
    let port = config.port.clone();
    let state = Arc::new(RegistryState::new(config, storage));
    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    info!(%addr, "registry listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}
