//! Serve command - run the daemon
//!
//! Builds the store tree, drives `periodic_check` on a timer, runs every
//! configured source and flushes the tree on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sluice_config::{Config, SourceConfig};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::handler::Handler;
use crate::tail::TailSource;

/// Run the serve command
pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        platform = std::env::consts::OS,
        config = %config_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(default)".to_string()),
        "sluice starting"
    );

    let config = super::load_config(config_path)?;

    if let Err(e) = run_server(config).await {
        error!(error = %e, "server error");
        return Err(e);
    }

    info!("sluice shutdown complete");
    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();

    // Store operations block on disk and sockets
    let handler = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Handler::from_config(&config))
            .await
            .context("store setup task failed")??
    };
    let handler = Arc::new(handler);
    {
        let handler = Arc::clone(&handler);
        tokio::task::spawn_blocking(move || handler.open())
            .await
            .context("store open task failed")?;
    }
    info!(store_type = %handler.root().store_type(), "store tree ready");

    let mut background = vec![spawn_checker(
        Arc::clone(&handler),
        config.global.check_interval(),
        cancel.clone(),
    )];
    if let Some(interval) = config.global.stats_interval() {
        background.push(spawn_stats(Arc::clone(&handler), interval, cancel.clone()));
    }

    let mut sources: Vec<JoinHandle<()>> = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        match source {
            SourceConfig::Tail(tail) => {
                let source = TailSource::new(tail);
                let handler = Arc::clone(&handler);
                let cancel = cancel.clone();
                sources.push(tokio::task::spawn_blocking(move || source.run(handler, cancel)));
            }
        }
    }
    if sources.is_empty() {
        warn!("no sources configured, only periodic checks will run");
    }

    wait_for_shutdown().await;
    info!("shutdown signal received, stopping...");
    cancel.cancel();

    let shutdown_timeout = config.global.shutdown_timeout();
    for task in sources {
        match tokio::time::timeout(shutdown_timeout, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "source task panicked during shutdown"),
            Err(_) => warn!("source did not stop within timeout, continuing shutdown"),
        }
    }
    for task in background {
        match tokio::time::timeout(shutdown_timeout, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "background task panicked"),
            Err(_) => warn!("background task did not stop within timeout"),
        }
    }

    let handler_for_close = Arc::clone(&handler);
    tokio::task::spawn_blocking(move || {
        handler_for_close.log_stats();
        handler_for_close.shutdown();
    })
    .await
    .context("store shutdown task failed")?;

    Ok(())
}

/// Tick `periodic_check` on the whole tree
fn spawn_checker(handler: Arc<Handler>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let handler = Arc::clone(&handler);
                    if let Err(e) = tokio::task::spawn_blocking(move || handler.periodic_check()).await {
                        warn!(error = %e, "periodic check panicked");
                    }
                }
            }
        }
    })
}

fn spawn_stats(handler: Arc<Handler>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // First tick fires immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => handler.log_stats(),
            }
        }
    })
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
