//! Session manager and proactive refresh loop.
//!
//! Owns the single-writer discipline over the token store: all writes funnel
//! through `login`, `logout`, and `refresh_once`. Consumers read session
//! state through `current_claims`/`is_authenticated` or subscribe to state
//! transitions over a watch channel; they never touch the store directly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::{AuthError, Exchange};
use crate::auth::claims::{self, SessionClaims};
use crate::auth::store::TokenStore;

/// Where the session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    Active,
    Refreshing,
}

/// What a single refresh attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The pair was exchanged and saved.
    Refreshed,
    /// Another refresh was already in flight; this tick was skipped.
    SkippedInFlight,
    /// Nothing stored to refresh, or the result was discarded after logout.
    NoSession,
}

/// Session/token lifecycle coordinator.
///
/// Constructed once at startup with an injected store and exchanger, then
/// shared behind an `Arc`.
pub struct SessionManager<S, E> {
    store: S,
    exchanger: E,
    refresh_interval: Duration,
    /// At-most-one-concurrent-refresh guard.
    refresh_in_flight: AtomicBool,
    /// Bumped on login/logout; a refresh that started under an older epoch
    /// must not write its result back.
    epoch: AtomicU64,
    state_tx: watch::Sender<SessionState>,
}

/// Resets the in-flight flag on every exit path of a refresh.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<S: TokenStore, E: Exchange> SessionManager<S, E> {
    pub fn new(store: S, exchanger: E, refresh_interval: Duration) -> Self {
        // Store presence alone is not validity
        let initial = match store.load() {
            Ok(Some(pair)) if claims::is_valid(&pair.access_token) => SessionState::Active,
            _ => SessionState::LoggedOut,
        };
        let (state_tx, _) = watch::channel(initial);
        Self {
            store,
            exchanger,
            refresh_interval,
            refresh_in_flight: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            state_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch session state transitions (e.g. to redirect on forced logout).
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Interactive login via the password grant. On success the new pair
    /// replaces whatever was stored and the decoded claims are returned.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<SessionClaims, AuthError> {
        let pair = self.exchanger.exchange_password(username, password).await?;
        let session_claims = claims::decode(&pair.access_token).ok_or_else(|| {
            AuthError::InvalidResponse("access token payload did not decode".to_string())
        })?;

        // Invalidate any refresh still in flight for the previous session
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.store.save(&pair)?;
        self.state_tx.send_replace(SessionState::Active);
        info!(username, "Logged in");
        Ok(session_claims)
    }

    /// Explicit logout. Revocation at the provider is best-effort; the local
    /// store is cleared unconditionally and logout wins over any refresh
    /// completion that lands afterwards.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.epoch.fetch_add(1, Ordering::SeqCst);

        if let Ok(Some(pair)) = self.store.load() {
            if let Err(e) = self.exchanger.revoke(&pair.refresh_token).await {
                warn!(error = %e, "Provider logout failed, clearing local session anyway");
            }
        }

        self.store.clear()?;
        self.state_tx.send_replace(SessionState::LoggedOut);
        info!("Logged out");
        Ok(())
    }

    /// Current access token, if any pair is stored.
    pub fn access_token(&self) -> Option<String> {
        self.store
            .load()
            .ok()
            .flatten()
            .map(|pair| pair.access_token)
    }

    /// Claims decoded from the stored access token. Recomputed on every
    /// call; decode failure reads as no session.
    pub fn current_claims(&self) -> Option<SessionClaims> {
        self.store
            .load()
            .ok()
            .flatten()
            .and_then(|pair| claims::decode(&pair.access_token))
    }

    /// Whether a stored, unexpired session exists right now.
    pub fn is_authenticated(&self) -> bool {
        self.store
            .load()
            .ok()
            .flatten()
            .map(|pair| claims::is_valid(&pair.access_token))
            .unwrap_or(false)
    }

    /// One refresh attempt against the stored refresh token.
    ///
    /// A definitive provider rejection clears the store and forces logout.
    /// Transport failures leave the store untouched; the next tick retries.
    pub async fn refresh_once(&self) -> Result<RefreshOutcome, AuthError> {
        if self.refresh_in_flight.swap(true, Ordering::SeqCst) {
            debug!("Refresh already in flight, skipping tick");
            return Ok(RefreshOutcome::SkippedInFlight);
        }
        let _guard = InFlightGuard(&self.refresh_in_flight);

        let Some(pair) = self.store.load()? else {
            return Ok(RefreshOutcome::NoSession);
        };
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.state_tx.send_replace(SessionState::Refreshing);

        match self.exchanger.exchange_refresh(&pair.refresh_token).await {
            Ok(new_pair) => {
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    // Logout or re-login happened while we were in flight;
                    // the store must not be resurrected.
                    debug!("Discarding refresh result from a superseded session");
                    return Ok(RefreshOutcome::NoSession);
                }
                self.store.save(&new_pair)?;
                self.state_tx.send_replace(SessionState::Active);
                debug!("Session refreshed");
                Ok(RefreshOutcome::Refreshed)
            }
            Err(AuthError::RefreshFailed(msg)) => {
                warn!(reason = %msg, "Refresh rejected by provider, forcing logout");
                self.store.clear()?;
                self.state_tx.send_replace(SessionState::LoggedOut);
                Err(AuthError::RefreshFailed(msg))
            }
            Err(e) => {
                // Transient (network, timeout, bad body): keep the session
                warn!(error = %e, "Refresh attempt failed, will retry next tick");
                if self.epoch.load(Ordering::SeqCst) == epoch {
                    self.state_tx.send_replace(SessionState::Active);
                }
                Err(e)
            }
        }
    }

    /// Drive `refresh_once` on a fixed cadence until `shutdown` flips.
    ///
    /// Ticks that fire while a refresh is still in flight are skipped, and
    /// missed ticks are not replayed.
    pub async fn run_refresh_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately; the cadence
        // starts one full period after startup.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.refresh_once().await {
                        Ok(outcome) => debug!(?outcome, "Refresh tick"),
                        Err(AuthError::RefreshFailed(_)) => {
                            info!("Session ended by provider");
                        }
                        Err(e) => warn!(error = %e, "Refresh tick failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Refresh loop stopped");
    }
}

impl<S: TokenStore + 'static, E: Exchange + 'static> SessionManager<S, E> {
    /// Spawn the refresh loop as a background task. The returned handle must
    /// be stopped (or aborted) when the owning context is torn down so no
    /// orphaned refresh attempts outlive it.
    pub fn spawn_refresh_loop(self: &Arc<Self>) -> RefreshLoopHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            manager.run_refresh_loop(shutdown_rx).await;
        });
        RefreshLoopHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }
}

/// Handle to a spawned refresh loop.
pub struct RefreshLoopHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RefreshLoopHandle {
    /// Signal the loop to stop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }

    /// Tear the loop down without waiting.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    use crate::auth::claims::encode_token;
    use crate::auth::store::{MemoryTokenStore, TokenPair};

    fn valid_pair(tag: &str) -> TokenPair {
        let token = encode_token(&json!({
            "sub": tag,
            "preferred_username": "user1",
            "roles": ["user"],
            "exp": (Utc::now() + chrono::Duration::seconds(300)).timestamp(),
        }));
        TokenPair {
            access_token: token,
            refresh_token: format!("refresh-{}", tag),
            expires_at: Utc::now() + chrono::Duration::seconds(300),
        }
    }

    fn expired_pair() -> TokenPair {
        let token = encode_token(&json!({
            "sub": "old",
            "exp": (Utc::now() - chrono::Duration::seconds(1)).timestamp(),
        }));
        TokenPair {
            access_token: token,
            refresh_token: "refresh-old".to_string(),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
        }
    }

    #[derive(Default)]
    struct MockExchange {
        refresh_delay: Duration,
        refresh_results: Mutex<VecDeque<Result<TokenPair, AuthError>>>,
        refresh_calls: AtomicUsize,
    }

    impl MockExchange {
        fn with_refresh_results(results: Vec<Result<TokenPair, AuthError>>) -> Self {
            Self {
                refresh_results: Mutex::new(results.into()),
                ..Default::default()
            }
        }

        fn with_refresh_delay(delay: Duration) -> Self {
            Self {
                refresh_delay: delay,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Exchange for MockExchange {
        async fn exchange_password(
            &self,
            _username: &str,
            password: &str,
        ) -> Result<TokenPair, AuthError> {
            if password == "correctpw" {
                Ok(valid_pair("login"))
            } else {
                Err(AuthError::InvalidCredentials(
                    "Invalid user credentials".to_string(),
                ))
            }
        }

        async fn exchange_refresh(&self, _refresh_token: &str) -> Result<TokenPair, AuthError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if !self.refresh_delay.is_zero() {
                tokio::time::sleep(self.refresh_delay).await;
            }
            self.refresh_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(valid_pair("refreshed")))
        }

        async fn exchange_client_credentials(&self) -> Result<String, AuthError> {
            Ok("service-token".to_string())
        }

        async fn revoke(&self, _refresh_token: &str) -> Result<(), AuthError> {
            Ok(())
        }
    }

    fn manager(exchanger: MockExchange) -> SessionManager<MemoryTokenStore, MockExchange> {
        SessionManager::new(
            MemoryTokenStore::new(),
            exchanger,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_login_logout_round_trip() {
        let mgr = manager(MockExchange::default());
        assert!(!mgr.is_authenticated());
        assert_eq!(mgr.state(), SessionState::LoggedOut);

        let session_claims = mgr.login("user1", "correctpw").await.expect("login");
        assert_eq!(session_claims.username, "user1");
        assert!(mgr.is_authenticated());
        assert_eq!(mgr.state(), SessionState::Active);

        mgr.logout().await.expect("logout");
        assert!(!mgr.is_authenticated());
        assert!(mgr.current_claims().is_none());
        assert_eq!(mgr.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn test_login_bad_password() {
        let mgr = manager(MockExchange::default());
        let err = mgr.login("user1", "wrongpw").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials(_)));
        assert!(!mgr.is_authenticated());
    }

    #[tokio::test]
    async fn test_startup_state_from_store() {
        let store = MemoryTokenStore::new();
        store.save(&valid_pair("boot")).expect("save");
        let mgr = SessionManager::new(store, MockExchange::default(), Duration::from_secs(60));
        assert_eq!(mgr.state(), SessionState::Active);

        // An expired pair is present but not a session
        let store = MemoryTokenStore::new();
        store.save(&expired_pair()).expect("save");
        let mgr = SessionManager::new(store, MockExchange::default(), Duration::from_secs(60));
        assert_eq!(mgr.state(), SessionState::LoggedOut);
        assert!(!mgr.is_authenticated());
        assert!(mgr.access_token().is_some());
    }

    #[tokio::test]
    async fn test_refresh_replaces_pair() {
        let mgr = manager(MockExchange::default());
        mgr.login("user1", "correctpw").await.expect("login");
        let before = mgr.access_token().expect("token");

        let outcome = mgr.refresh_once().await.expect("refresh");
        assert_eq!(outcome, RefreshOutcome::Refreshed);
        let after = mgr.access_token().expect("token");
        assert_ne!(before, after);
        assert_eq!(mgr.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_refresh_rejection_forces_logout() {
        let exchanger = MockExchange::with_refresh_results(vec![Err(AuthError::RefreshFailed(
            "Session not active".to_string(),
        ))]);
        let mgr = manager(exchanger);
        mgr.login("user1", "correctpw").await.expect("login");

        let err = mgr.refresh_once().await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed(_)));
        assert!(mgr.access_token().is_none(), "store must be empty");
        assert_eq!(mgr.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_keeps_session() {
        let exchanger = MockExchange::with_refresh_results(vec![Err(
            AuthError::InvalidResponse("connection reset".to_string()),
        )]);
        let mgr = manager(exchanger);
        mgr.login("user1", "correctpw").await.expect("login");
        let before = mgr.access_token().expect("token");

        assert!(mgr.refresh_once().await.is_err());
        assert_eq!(mgr.access_token(), Some(before), "store untouched");
        assert_eq!(mgr.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_refresh_with_no_session() {
        let mgr = manager(MockExchange::default());
        let outcome = mgr.refresh_once().await.expect("refresh");
        assert_eq!(outcome, RefreshOutcome::NoSession);
        assert_eq!(mgr.exchanger.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_refresh_in_flight() {
        let mgr = manager(MockExchange::with_refresh_delay(Duration::from_secs(5)));
        mgr.login("user1", "correctpw").await.expect("login");

        let (first, second) = tokio::join!(mgr.refresh_once(), mgr.refresh_once());
        assert_eq!(first.expect("first"), RefreshOutcome::Refreshed);
        assert_eq!(second.expect("second"), RefreshOutcome::SkippedInFlight);
        assert_eq!(mgr.exchanger.calls(), 1);

        // Guard resets once the slow refresh is done
        assert_eq!(
            mgr.refresh_once().await.expect("third"),
            RefreshOutcome::Refreshed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_wins_over_inflight_refresh() {
        let mgr = Arc::new(manager(MockExchange::with_refresh_delay(
            Duration::from_secs(10),
        )));
        mgr.login("user1", "correctpw").await.expect("login");

        let task = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.refresh_once().await })
        };
        // Let the refresh reach its suspension point
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(mgr.state(), SessionState::Refreshing);

        mgr.logout().await.expect("logout");
        assert!(mgr.access_token().is_none());

        let outcome = task.await.expect("join").expect("refresh");
        assert_eq!(outcome, RefreshOutcome::NoSession);
        assert!(
            mgr.access_token().is_none(),
            "late refresh must not resurrect the store"
        );
        assert_eq!(mgr.state(), SessionState::LoggedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_loop_ticks_and_stops() {
        let mgr = Arc::new(manager(MockExchange::default()));
        mgr.login("user1", "correctpw").await.expect("login");

        let handle = mgr.spawn_refresh_loop();
        // Let the loop start and register its timer before advancing the clock
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(mgr.exchanger.calls() >= 1, "loop should have ticked");

        handle.stop().await;
        let calls = mgr.exchanger.calls();
        tokio::time::advance(Duration::from_secs(300)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(mgr.exchanger.calls(), calls, "no refreshes after shutdown");
    }
}
