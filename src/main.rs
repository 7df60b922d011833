//! OptionSync daemon
//!
//! Restores the last session, keeps polling the option chain and, with the
//! `dashboard` feature, serves the browser API.

use anyhow::{Context, Result};
use optionsync::client::HttpAnalyticsClient;
use optionsync::config::{AppConfig, LoggingConfig};
use optionsync::persistence::FileSessionStore;
use optionsync::sync::{SyncEvent, SyncOrchestrator};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "🚀 OptionSync starting");
    info!(config = %config, "Configuration loaded");

    let api = Arc::new(
        HttpAnalyticsClient::new(config.api.base_url.clone(), config.api.request_timeout())
            .context("Failed to create analytics client")?,
    );
    let store = Arc::new(FileSessionStore::new(config.persistence.session_path()));
    let orchestrator = SyncOrchestrator::new(api, store, config.poll.interval());

    tokio::spawn(log_events(orchestrator.subscribe()));

    let resumed = orchestrator.restore().await;
    if !resumed && config.session.auto_start {
        match (&config.session.user, &config.session.expiry) {
            (Some(user), Some(expiry)) => orchestrator
                .start_fetching(user, expiry)
                .await
                .context("Failed to start fetching from configured session")?,
            _ => warn!("session.auto_start is set but session.user/session.expiry are missing"),
        }
    }

    spawn_dashboard(&config, &orchestrator);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("🛑 Shutdown requested");
    orchestrator.shutdown().await;
    Ok(())
}

#[cfg(feature = "dashboard")]
fn spawn_dashboard(config: &AppConfig, orchestrator: &SyncOrchestrator) {
    if !config.dashboard.enabled {
        return;
    }
    let orchestrator = orchestrator.clone();
    let port = config.dashboard.port;
    tokio::spawn(async move {
        if let Err(e) = optionsync::dashboard::start_server(orchestrator, port).await {
            error!(error = %e, "Dashboard server error");
        }
    });
}

#[cfg(not(feature = "dashboard"))]
fn spawn_dashboard(config: &AppConfig, _orchestrator: &SyncOrchestrator) {
    if config.dashboard.enabled {
        warn!("dashboard.enabled is set but the binary was built without the `dashboard` feature");
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Mirror session events into the log
async fn log_events(mut rx: tokio::sync::broadcast::Receiver<SyncEvent>) {
    loop {
        match rx.recv().await {
            Ok(SyncEvent::Error(message)) => error!(error = %message, "Surfaced fetch error"),
            Ok(SyncEvent::PollingChanged(running)) => info!(running, "Polling state changed"),
            Ok(SyncEvent::KeyChanged(key)) => info!(key = %key, "Session key changed"),
            Ok(SyncEvent::Cleared(key)) => info!(key = %key, "Session cleared"),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
