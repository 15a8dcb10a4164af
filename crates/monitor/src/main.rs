//! Pod Monitor - alerts an analysis service when pods enter a bad state
//!
//! Watches pods cluster-wide (or in one namespace), detects the moment a pod
//! starts failing and asks the analysis service to investigate, at most once
//! per suppression window per pod.

use anyhow::{Context, Result};
use monitor_lib::{
    controller::PodController,
    dispatcher::HttpDispatcher,
    health::{components, HealthRegistry},
    observability::{MonitorMetrics, StructuredLogger},
    suppression::{SuppressionCache, SuppressionSweeper, SystemClock},
    watcher::{pod_watch_stream, HandlerPool, MirrorConfig, PodMirror, DEFAULT_QUEUE_CAPACITY},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting pod-monitor");

    let config = config::MonitorConfig::load()?;
    info!(
        node_name = %config.node_name,
        namespace = ?config.namespace,
        "Monitor configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::WATCHER).await;
    health_registry.register(components::DISPATCHER).await;

    let metrics = MonitorMetrics::new();

    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(
        MONITOR_VERSION,
        &config.analysis_endpoint,
        config.suppression_window(),
    );

    let cache = Arc::new(SuppressionCache::new());

    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        suppression: cache.clone(),
        metrics: metrics.clone(),
    });
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let dispatcher = Arc::new(
        HttpDispatcher::new(config.analysis_endpoint.clone(), config.dispatch_timeout())
            .context("Failed to create analysis client")?,
    );
    let controller = Arc::new(PodController::new(
        cache.clone(),
        dispatcher,
        config.suppression_window(),
        health_registry.clone(),
        metrics.clone(),
        logger.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);

    let pool = HandlerPool::spawn(
        controller,
        config.handler_workers,
        DEFAULT_QUEUE_CAPACITY,
        &shutdown_tx,
        metrics.clone(),
    );

    let sweeper_handle = config.suppression_sweep_interval().map(|interval| {
        let sweeper = SuppressionSweeper::new(
            cache.clone(),
            Arc::new(SystemClock),
            config.suppression_window(),
            interval,
            metrics.clone(),
        );
        tokio::spawn(sweeper.run(shutdown_tx.subscribe()))
    });

    let mirror = PodMirror::new(
        MirrorConfig {
            resync_period: config.resync_period(),
            initial_sync_timeout: config.initial_sync_timeout(),
        },
        health_registry.clone(),
        metrics.clone(),
        logger.clone(),
    );
    let stream = pod_watch_stream(
        client,
        config.namespace.as_deref(),
        config.label_selector.as_deref(),
    );
    let mut watch_handle = tokio::spawn(mirror.run(stream, pool, shutdown_tx.subscribe()));

    let watch_result = tokio::select! {
        res = &mut watch_handle => res,
        reason = shutdown_signal() => {
            logger.log_shutdown(reason);
            let _ = shutdown_tx.send(());
            // In-flight dispatches finish or hit their timeout before this returns.
            watch_handle.await
        }
    };

    // Stop the sweeper when the watch failed on its own.
    let _ = shutdown_tx.send(());
    if let Some(handle) = sweeper_handle {
        let _ = handle.await;
    }
    api_handle.abort();

    match watch_result {
        Ok(Ok(())) => {
            info!("Shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Pod watch failed");
            Err(e).context("Pod watch failed")
        }
        Err(e) => Err(e).context("Pod watch task panicked"),
    }
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT received",
                    _ = sigterm.recv() => "SIGTERM received",
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT received"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT received"
    }
}
