//! slotsync sync engine daemon
//!
//! Restores local assignment state, keeps the remote session fresh and pulls
//! from the remote label service on request or on a fixed interval.
//!
//! ## Architecture
//!
//! - **Token Loop**: refreshes the bearer token ahead of expiry
//! - **Sync Worker**: full pulls, on request and periodically
//! - **Session Writer**: persists every new session so restarts stay logged in

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use slotsync_engine::persist::{EngineState, SqliteKv};
use slotsync_engine::token::{run_token_loop, TokenManager};
use slotsync_engine::worker::{run_sync_worker, SyncRequester, SyncSource};
use slotsync_engine::{AssignmentController, EngineConfig, HttpAuthClient, HttpLabelClient};

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting slotsync sync engine");
    info!(
        remote_url = %config.remote_url,
        total_spaces = config.total_spaces,
        data_dir = %config.data_dir,
        "Configuration loaded"
    );

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {}", config.data_dir))?;
    let kv = Arc::new(SqliteKv::open(config.state_path())?);
    let state = EngineState::new(kv);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Remote session
    let remote = config.remote();
    let tokens = Arc::new(TokenManager::new(
        Arc::new(HttpAuthClient::new(&remote)?),
        config.token_refresh_threshold(),
    ));
    match state.load_session()? {
        Some(session) => tokens.connect(session).await,
        None => warn!("No stored credentials; remote calls will fail until login"),
    }

    let session_writer = tokio::spawn({
        let state = state.clone();
        let mut sessions = tokens.subscribe();
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            loop {
                tokio::select! {
                    changed = sessions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let session = sessions.borrow_and_update().clone();
                        if let Err(e) = state.save_session(session.as_ref()) {
                            error!(error = %e, "Failed to persist session");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        }
    });

    let token_handle = tokio::spawn(run_token_loop(
        Arc::clone(&tokens),
        config.token_check_interval(),
        shutdown_rx.clone(),
    ));

    // Controller and sync worker
    let label_client = Arc::new(HttpLabelClient::new(&remote, Arc::clone(&tokens))?);
    let controller = Arc::new(AssignmentController::restore(
        label_client,
        config.controller(),
        state,
    )?);
    info!(capacity = ?controller.capacity().await, "Engine state restored");

    let (requester, requests) = SyncRequester::channel();
    let worker_handle = tokio::spawn(run_sync_worker(
        Arc::clone(&controller),
        requests,
        config.sync_interval(),
        shutdown_rx.clone(),
    ));

    if config.sync_interval().is_some() {
        requester.request(SyncSource::Manual);
    }

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = token_handle => {
            if let Err(e) = result {
                error!(error = %e, "Token loop panicked");
            }
        }
        result = worker_handle => {
            if let Err(e) = result {
                error!(error = %e, "Sync worker panicked");
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    if let Err(e) = session_writer.await {
        error!(error = %e, "Session writer panicked");
    }
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    info!("Sync engine shutdown complete");
    Ok(())
}
