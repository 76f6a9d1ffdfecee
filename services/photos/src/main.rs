use anyhow::{Context, Result};
use photo_service::config::{BlobBackendKind, Config, DocumentBackend};
use photo_service::{
    start_api_server, AppState, BlobBackend, DocumentCollection, GeoFilter, ImageStore,
    MemoryBlobBackend, MemoryDocumentCollection, PgDocumentCollection, PhotoRepository,
    PhotoService, S3BlobBackend,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Photo Service"
    );

    if config.service.metrics_enabled {
        init_metrics(config.service.metrics_port)?;
    }

    let collection = init_document_collection(&config).await?;
    let blob_backend = init_blob_backend(&config).await?;

    let service = PhotoService::new(
        PhotoRepository::new(collection),
        ImageStore::new(blob_backend, config.upload_timeout()),
        GeoFilter::from_config(&config.geo),
    )
    .with_body_limit(config.api.max_decompressed_bytes);

    let api_state = AppState { service };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Photo service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down photo service");

    api_handle.abort();

    info!("Photo service stopped");

    Ok(())
}

async fn init_document_collection(config: &Config) -> Result<Arc<dyn DocumentCollection>> {
    match config.database.backend {
        DocumentBackend::Postgres => {
            let collection = PgDocumentCollection::new(&config.database)
                .await
                .context("Failed to initialize document store")?;

            // Run migrations if enabled
            if config.database.run_migrations {
                collection
                    .run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }

            Ok(Arc::new(collection))
        }
        DocumentBackend::Memory => {
            warn!("Using in-memory document store; photos are lost on restart");
            Ok(Arc::new(MemoryDocumentCollection::new()))
        }
    }
}

async fn init_blob_backend(config: &Config) -> Result<Arc<dyn BlobBackend>> {
    match config.blob.backend {
        BlobBackendKind::S3 => {
            let backend = S3BlobBackend::new(&config.blob)
                .await
                .context("Failed to initialize S3 blob backend")?;
            Ok(Arc::new(backend))
        }
        BlobBackendKind::Memory => {
            warn!("Using in-memory blob store; images are lost on restart");
            Ok(Arc::new(MemoryBlobBackend::from_config(&config.blob)))
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
