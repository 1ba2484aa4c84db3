//! Bearer token lifecycle.
//!
//! ```text
//! Disconnected ──connect──▶ Connected ──near expiry──▶ Refreshing
//!       ▲                       ▲                          │
//!       │                       └──────── success ─────────┤
//!       └──────────────────────── failure ─────────────────┘
//! ```
//!
//! A refresh failure drops the session entirely so dependent calls fail fast
//! with `AuthExpired` instead of sending a stale token. An expired token is
//! never handed out, even while a refresh is in progress.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::client::RemoteError;

/// Tokens issued by the remote service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Exchanges a refresh token for a new session.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<Session, RemoteError>;
}

/// Observable connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPhase {
    Disconnected,
    Connected,
    Refreshing,
}

#[derive(Debug, Clone)]
enum TokenState {
    Disconnected,
    Connected(Session),
    Refreshing(Session),
}

/// Result of one expiry check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No session, or not yet within the refresh threshold.
    Skipped,
    /// A new session was installed.
    Refreshed { expires_at: DateTime<Utc> },
    /// The refresh failed and the session was dropped.
    Disconnected { reason: String },
}

/// Owns the current session and refreshes it ahead of expiry.
pub struct TokenManager {
    state: RwLock<TokenState>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_threshold: chrono::Duration,
    sessions: watch::Sender<Option<Session>>,
}

impl TokenManager {
    pub fn new(refresher: Arc<dyn TokenRefresher>, refresh_threshold: chrono::Duration) -> Self {
        let (sessions, _) = watch::channel(None);
        Self {
            state: RwLock::new(TokenState::Disconnected),
            refresher,
            refresh_threshold,
            sessions,
        }
    }

    /// Install a session obtained out of band (login, stored credentials).
    pub async fn connect(&self, session: Session) {
        info!(expires_at = %session.expires_at, "Token session connected");
        *self.state.write().await = TokenState::Connected(session.clone());
        self.sessions.send_replace(Some(session));
    }

    pub async fn disconnect(&self) {
        *self.state.write().await = TokenState::Disconnected;
        self.sessions.send_replace(None);
    }

    pub async fn phase(&self) -> TokenPhase {
        match *self.state.read().await {
            TokenState::Disconnected => TokenPhase::Disconnected,
            TokenState::Connected(_) => TokenPhase::Connected,
            TokenState::Refreshing(_) => TokenPhase::Refreshing,
        }
    }

    /// Current session, if any. Useful for persisting credentials.
    pub async fn session(&self) -> Option<Session> {
        match &*self.state.read().await {
            TokenState::Disconnected => None,
            TokenState::Connected(s) | TokenState::Refreshing(s) => Some(s.clone()),
        }
    }

    /// Receives every session change, `None` on disconnect.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.sessions.subscribe()
    }

    /// Access token for a request made at `now`.
    pub async fn bearer_token(&self, now: DateTime<Utc>) -> Result<String, RemoteError> {
        match &*self.state.read().await {
            TokenState::Disconnected => Err(RemoteError::AuthExpired("not connected".to_string())),
            TokenState::Connected(s) | TokenState::Refreshing(s) => {
                if s.is_expired(now) {
                    Err(RemoteError::AuthExpired(format!(
                        "token expired at {}",
                        s.expires_at
                    )))
                } else {
                    Ok(s.access_token.clone())
                }
            }
        }
    }

    /// Refresh the session if it expires within the threshold of `now`.
    pub async fn check_and_refresh(&self, now: DateTime<Utc>) -> RefreshOutcome {
        let refresh_token = {
            let mut state = self.state.write().await;
            let session = match &*state {
                TokenState::Connected(s) => s.clone(),
                TokenState::Disconnected | TokenState::Refreshing(_) => {
                    return RefreshOutcome::Skipped
                }
            };

            if session.expires_at - self.refresh_threshold > now {
                return RefreshOutcome::Skipped;
            }

            let refresh_token = session.refresh_token.clone();
            *state = TokenState::Refreshing(session);
            refresh_token
        };

        debug!("Refreshing access token");
        match self.refresher.refresh(&refresh_token).await {
            Ok(session) => {
                let expires_at = session.expires_at;
                *self.state.write().await = TokenState::Connected(session.clone());
                self.sessions.send_replace(Some(session));
                info!(expires_at = %expires_at, "Access token refreshed");
                RefreshOutcome::Refreshed { expires_at }
            }
            Err(e) => {
                *self.state.write().await = TokenState::Disconnected;
                self.sessions.send_replace(None);
                warn!(error = %e, "Token refresh failed, session dropped");
                RefreshOutcome::Disconnected {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Run the token refresh loop until shutdown.
pub async fn run_token_loop(
    manager: Arc<TokenManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_secs = interval.as_secs(),
        "Starting token refresh loop"
    );

    let mut interval_timer = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                if let RefreshOutcome::Disconnected { reason } =
                    manager.check_and_refresh(Utc::now()).await
                {
                    error!(reason = %reason, "Remote session lost; remote calls will fail until re-login");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Token refresh loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct FixedRefresher {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl TokenRefresher for FixedRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<Session, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RemoteError::Status {
                    status: 400,
                    body: "invalid_grant".into(),
                });
            }
            Ok(Session {
                access_token: format!("new-for-{refresh_token}"),
                refresh_token: "rt-2".into(),
                expires_at: t0() + chrono::Duration::hours(1),
            })
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn session(expires_in_minutes: i64) -> Session {
        Session {
            access_token: "at-1".into(),
            refresh_token: "rt-1".into(),
            expires_at: t0() + chrono::Duration::minutes(expires_in_minutes),
        }
    }

    fn manager(fail: bool) -> (TokenManager, Arc<FixedRefresher>) {
        let refresher = Arc::new(FixedRefresher {
            calls: AtomicU32::new(0),
            fail,
        });
        let manager = TokenManager::new(refresher.clone(), chrono::Duration::minutes(5));
        (manager, refresher)
    }

    #[tokio::test]
    async fn test_disconnected_has_no_token() {
        let (manager, _) = manager(false);
        assert_eq!(manager.phase().await, TokenPhase::Disconnected);
        assert!(matches!(
            manager.bearer_token(t0()).await,
            Err(RemoteError::AuthExpired(_))
        ));
        assert_eq!(manager.check_and_refresh(t0()).await, RefreshOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_fresh_token_not_refreshed() {
        let (manager, refresher) = manager(false);
        manager.connect(session(30)).await;

        assert_eq!(manager.check_and_refresh(t0()).await, RefreshOutcome::Skipped);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.bearer_token(t0()).await.unwrap(), "at-1");
    }

    #[tokio::test]
    async fn test_refresh_within_threshold() {
        let (manager, refresher) = manager(false);
        manager.connect(session(4)).await;
        let mut sessions = manager.subscribe();

        let outcome = manager.check_and_refresh(t0()).await;
        assert_eq!(
            outcome,
            RefreshOutcome::Refreshed {
                expires_at: t0() + chrono::Duration::hours(1)
            }
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.phase().await, TokenPhase::Connected);
        assert_eq!(manager.bearer_token(t0()).await.unwrap(), "new-for-rt-1");

        assert!(sessions.has_changed().unwrap());
        let latest = sessions.borrow_and_update().clone().unwrap();
        assert_eq!(latest.refresh_token, "rt-2");
    }

    #[tokio::test]
    async fn test_refresh_failure_disconnects() {
        let (manager, _) = manager(true);
        manager.connect(session(1)).await;

        let outcome = manager.check_and_refresh(t0()).await;
        assert!(matches!(outcome, RefreshOutcome::Disconnected { .. }));
        assert_eq!(manager.phase().await, TokenPhase::Disconnected);
        assert!(manager.session().await.is_none());
        assert!(manager.bearer_token(t0()).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_token_never_returned() {
        let (manager, _) = manager(false);
        manager.connect(session(10)).await;

        let later = t0() + chrono::Duration::minutes(10);
        assert!(matches!(
            manager.bearer_token(later).await,
            Err(RemoteError::AuthExpired(_))
        ));
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let rendered = format!("{:?}", session(5));
        assert!(!rendered.contains("at-1"));
        assert!(!rendered.contains("rt-1"));
    }
}
