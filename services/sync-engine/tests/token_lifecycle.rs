//! Token refresh loop behaviour.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use slotsync_engine::token::{run_token_loop, Session, TokenManager, TokenPhase, TokenRefresher};
use slotsync_engine::RemoteError;
use tokio::sync::watch;

struct CountingRefresher {
    calls: AtomicU32,
    fail: bool,
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh(&self, _refresh_token: &str) -> Result<Session, RemoteError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(RemoteError::AuthExpired("refresh token revoked".into()));
        }
        Ok(Session {
            access_token: format!("at-{n}"),
            refresh_token: format!("rt-{n}"),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}

fn expiring_session() -> Session {
    Session {
        access_token: "at-0".into(),
        refresh_token: "rt-0".into(),
        expires_at: Utc::now() + chrono::Duration::minutes(1),
    }
}

async fn start(
    fail: bool,
) -> (
    Arc<TokenManager>,
    Arc<CountingRefresher>,
    watch::Receiver<Option<Session>>,
    watch::Sender<bool>,
    tokio::task::JoinHandle<()>,
) {
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicU32::new(0),
        fail,
    });
    let manager = Arc::new(TokenManager::new(
        refresher.clone(),
        chrono::Duration::minutes(5),
    ));
    manager.connect(expiring_session()).await;
    let sessions = manager.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(run_token_loop(
        Arc::clone(&manager),
        Duration::from_millis(20),
        shutdown_rx,
    ));
    (manager, refresher, sessions, shutdown_tx, handle)
}

#[tokio::test]
async fn test_loop_refreshes_expiring_token() {
    let (manager, refresher, mut sessions, shutdown_tx, handle) = start(false).await;

    tokio::time::timeout(Duration::from_secs(2), sessions.changed())
        .await
        .expect("no refresh within timeout")
        .unwrap();

    assert_eq!(manager.bearer_token(Utc::now()).await.unwrap(), "at-1");
    assert_eq!(manager.phase().await, TokenPhase::Connected);

    // The new token is an hour out; further ticks leave it alone.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_loop_disconnects_on_refresh_failure() {
    let (manager, refresher, mut sessions, shutdown_tx, handle) = start(true).await;

    tokio::time::timeout(Duration::from_secs(2), sessions.changed())
        .await
        .expect("no state change within timeout")
        .unwrap();

    assert!(sessions.borrow().is_none());
    assert_eq!(manager.phase().await, TokenPhase::Disconnected);
    assert!(matches!(
        manager.bearer_token(Utc::now()).await,
        Err(RemoteError::AuthExpired(_))
    ));

    // Disconnected managers do not keep trying.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
