use anyhow::{Context, Result};
use media_service::{
    start_api_server, AppState, Config, ElasticsearchIndexer, IngestionCoordinator,
    MediaTranscoder, PgMetadataStore, S3ObjectStore, SearchIndexer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long shutdown waits for detached index pushes
const INDEX_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(service = %config.service.name, "Starting media service");

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let metadata_store = Arc::new(
        PgMetadataStore::new(&config.database)
            .await
            .context("Failed to initialize metadata store")?,
    );

    if config.database.run_migrations {
        metadata_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let object_store = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize object store")?,
    );
    object_store
        .ensure_bucket()
        .await
        .context("Failed to prepare bucket")?;

    let mut builder = IngestionCoordinator::builder(object_store, metadata_store.clone())
        .transcoder(MediaTranscoder::new(&config.media))
        .default_presign_ttl(config.s3.presign_ttl());

    if config.search.enabled {
        let indexer = ElasticsearchIndexer::new(&config.search)
            .context("Failed to initialize search indexer")?;
        // Search is optional at startup; writes keep flowing and lag is reported
        if let Err(e) = indexer.ensure_index().await {
            warn!(error = %e, "Search index not ready, documents will be pushed best-effort");
        }
        builder = builder.index(Arc::new(indexer));
    } else {
        info!("Search indexing disabled");
    }

    let coordinator = builder.build();

    let api_state = AppState {
        coordinator: coordinator.clone(),
        database: Some(metadata_store.pool().clone()),
        max_upload_bytes: config.media.max_upload_bytes,
    };

    info!("Media service started successfully");

    start_api_server(api_state, &config.api, shutdown_signal()).await?;

    info!("Shutting down media service");

    if tokio::time::timeout(INDEX_DRAIN_TIMEOUT, coordinator.wait_for_index())
        .await
        .is_err()
    {
        let health = coordinator.index_health();
        warn!(in_flight = health.in_flight, "Index pushes still pending at shutdown");
    }

    info!("Media service stopped");

    Ok(())
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
    metrics_exporter_prometheus::PrometheusBuilder::new()
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
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
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
