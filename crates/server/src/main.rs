//! Terrakube daemon: api, registry and executor services in one binary.

mod dispatch;
mod scheduler;
mod state_api;

use anyhow::Context;
use clap::Parser;
use dispatch::{DispatchBackend, EphemeralConfig, EphemeralDispatcher, InlineDispatcher};
use scheduler::JobScheduler;
use sqlx::postgres::PgPoolOptions;
use state_api::StateApi;
use std::sync::Arc;
use std::time::Duration;
use terrakube_core::config::ServiceType;
use terrakube_core::Config;
use terrakube_executor::{JobProcessor, StatusReporter};
use tracing::{info, Level};

/// Seconds between scheduler polls.
const SCHEDULER_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "terrakubed")]
#[command(about = "Terrakube control plane, registry and executor", long_about = None)]
struct Cli {
    /// Which services to host (api, registry, executor, all).
    #[arg(long, env = "SERVICE_TYPE", default_value = "all")]
    service_type: String,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let service_type = ServiceType::parse(&cli.service_type)?;

    // Single-service deployments default PORT by role before config load.
    if std::env::var("PORT").is_err() {
        match service_type {
            ServiceType::Executor => std::env::set_var("PORT", "8090"),
            ServiceType::Registry => std::env::set_var("PORT", "8075"),
            _ => {}
        }
    }

    let config = Config::from_env()?;
    info!(service_type = %cli.service_type, "starting terrakubed");

    match service_type {
        ServiceType::Api => start_api(config).await,
        ServiceType::Registry => terrakube_registry::start(config)
            .await
            .context("registry server failed"),
        ServiceType::Executor => terrakube_executor::start(config)
            .await
            .context("executor failed"),
        ServiceType::All => {
            let api_config = config.clone();
            let registry_config = config.clone();
            let mut executor_config = config;
            // The executor keeps its own port when everything shares one
            // process.
            executor_config.port = std::env::var("EXECUTOR_PORT").unwrap_or_else(|_| "8090".into());

            let api = tokio::spawn(start_api(api_config));
            let registry = tokio::spawn(async move {
                terrakube_registry::start(registry_config)
                    .await
                    .context("registry server failed")
            });
            let executor = tokio::spawn(async move {
                terrakube_executor::start(executor_config)
                    .await
                    .context("executor failed")
            });

            let (api, registry, executor) = tokio::try_join!(api, registry, executor)?;
            api?;
            registry?;
            executor?;
            Ok(())
        }
    }
}

/// API side: TFE-compat state endpoints plus the job scheduler.
async fn start_api(config: Config) -> anyhow::Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is required for the api service");
    }

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    let storage = terrakube_storage::from_config(&config).await?;

    let backend: Arc<dyn DispatchBackend> = if config.ephemeral_image.is_empty() {
        // Inline execution inside the api process.
        let client = terrakube_client::ControlPlaneClient::new(
            config.api_url.clone(),
            config.internal_secret.clone(),
        );
        let status = StatusReporter::new(client, storage.clone());
        let processor = Arc::new(JobProcessor::new(config.clone(), status, storage.clone()));
        Arc::new(InlineDispatcher::new(processor))
    } else {
        Arc::new(
            EphemeralDispatcher::new(EphemeralConfig {
                namespace: config.ephemeral_namespace.clone(),
                image: config.ephemeral_image.clone(),
                secret_name: config.ephemeral_secret_name.clone(),
                service_account: config.ephemeral_service_account.clone(),
                ..Default::default()
            })
            .await?,
        )
    };

    let scheduler = JobScheduler::new(pool.clone(), backend, SCHEDULER_INTERVAL);
    tokio::spawn(async move { scheduler.run().await });

    let app = StateApi {
        pool,
        hostname: config.hostname.clone(),
        storage,
    }
    .router();

    let port = std::env::var("API_PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("0.0.0.0:{port}");
    info!(%addr, "api listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
