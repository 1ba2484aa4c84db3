//! Background pull worker.
//!
//! Other components ask for a pull through a [`SyncRequester`] without
//! waiting for it. Requests arriving while one is already queued collapse
//! into it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::controller::AssignmentController;

/// Why a pull was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSource {
    /// A local record changed through another surface.
    RecordChanged(String),
    Manual,
    /// The periodic timer fired.
    Interval,
}

/// Fire-and-forget handle for requesting a pull.
#[derive(Debug, Clone)]
pub struct SyncRequester {
    tx: mpsc::Sender<SyncSource>,
}

impl SyncRequester {
    /// Requester and the receiving end for [`run_sync_worker`].
    pub fn channel() -> (Self, mpsc::Receiver<SyncSource>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Queue a pull. Returns false if the worker has stopped.
    pub fn request(&self, source: SyncSource) -> bool {
        match self.tx.try_send(source) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(source)) => {
                debug!(source = ?source, "Pull already pending");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Run pulls on request and, if `interval` is set, periodically.
pub async fn run_sync_worker(
    controller: Arc<AssignmentController>,
    mut requests: mpsc::Receiver<SyncSource>,
    interval: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_secs = interval.map(|d| d.as_secs()),
        "Starting sync worker"
    );

    let periodic = interval.is_some();
    let mut interval_timer = tokio::time::interval(interval.unwrap_or(Duration::from_secs(3600)));
    // The first tick completes immediately; skip it so startup does not pull twice.
    interval_timer.tick().await;

    let mut consecutive_failures = 0u32;
    let mut requests_open = true;

    while let Some(source) = next_source(
        &mut interval_timer,
        periodic,
        &mut requests,
        &mut requests_open,
        &mut shutdown,
    )
    .await
    {
        debug!(source = ?source, "Pulling from remote");
        match controller.sync_from_remote().await {
            Ok(count) => {
                consecutive_failures = 0;
                info!(count, source = ?source, "Remote pull complete");
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures <= 3 {
                    warn!(
                        error = %e,
                        code = e.code(),
                        consecutive_failures,
                        "Remote pull failed"
                    );
                } else {
                    error!(
                        error = %e,
                        code = e.code(),
                        consecutive_failures,
                        "Remote pull failed repeatedly"
                    );
                }
            }
        }
    }
    info!("Sync worker shutting down");
}

/// Wait for the next pull trigger. `None` once shutdown is signalled.
async fn next_source(
    interval_timer: &mut tokio::time::Interval,
    periodic: bool,
    requests: &mut mpsc::Receiver<SyncSource>,
    requests_open: &mut bool,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<SyncSource> {
    loop {
        tokio::select! {
            _ = interval_timer.tick(), if periodic => return Some(SyncSource::Interval),
            request = requests.recv(), if *requests_open => match request {
                Some(source) => return Some(source),
                None => *requests_open = false,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return None;
                }
            }
        }
    }
}
