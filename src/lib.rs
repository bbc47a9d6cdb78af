//! Docker Health Exporter: republishes the health check state of running
//! containers as Prometheus gauges.
//!
//! The collector polls the Docker Engine API on a fixed interval and writes two
//! gauges per monitored container into a registry owned by this process; the
//! HTTP server only ever reads that registry.
use std::sync::Arc;

pub mod api;
pub mod collector;
pub mod config;
pub mod container;
pub mod error;
pub mod filter;
pub mod health;
pub mod labels;
pub mod metrics;
pub mod runtime;

/// Runs the exporter until `SIGINT` or `SIGTERM`.
///
/// Loads the configuration, resolves the label schema once, builds the metric
/// registry, starts the collector task and serves the HTTP API.
///
/// # Errors
///
/// Only startup failures are returned:
/// - the metric registry rejects the resolved label schema.
/// - the HTTP listener cannot be bound.
///
/// Runtime failures (Docker unreachable, API errors, malformed containers) are
/// logged and retried on the next tick.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::Config::from_env();
    log::debug!("Configuration: {:?}", &config);

    let schema = labels::resolve(
        &labels::BASE_LABELS,
        &config.custom_labels,
        config.no_default_labels,
    );
    log::info!("Exporting series with labels [{}]", &schema);

    let metrics = Arc::new(metrics::HealthMetrics::new(
        schema,
        &config.metrics_namespace,
        config.stale_series_ticks,
    )?);

    let connector =
        runtime::DockerConnector::new(config.docker_socket.clone(), config.docker_timeout);
    let collector = collector::Collector::new(
        connector,
        Arc::clone(&metrics),
        collector::Settings {
            poll_interval: config.poll_interval,
            opt_in_only: config.opt_in_only,
            custom_labels: config.custom_labels.clone(),
        },
    );
    let status = collector.status();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let collector_handle = collector.spawn(shutdown_rx.clone());

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    log::info!(
        "Serving metrics on http://{} (Docker socket `{}`, opt-in only: {})",
        config.listen_addr,
        config.docker_socket.display(),
        config.opt_in_only
    );

    tokio::spawn(async move {
        shutdown_signal().await;
        log::info!("Received shutdown signal, stopping");
        let _ = shutdown_tx.send(true);
    });

    let mut server_shutdown = shutdown_rx;
    let api = api::APIServer::new(api::AppState::new(metrics, status));
    api.listen(listener, async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await;
    })
    .await?;

    if let Err(err) = collector_handle.await {
        log::error!("Collector task failed: {}", err);
    }

    Ok(())
}

/// Resolves on `SIGINT` or `SIGTERM`. A signal whose handler cannot be
/// installed is logged and never fires.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install SIGINT handler: {}", err);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                log::error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
