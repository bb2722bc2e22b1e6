//! Session guard: the client's belief about whether the admin is logged in.
//!
//! The guard never trusts its own in-memory state over storage. Every
//! decision re-reads the stored token, so the state can always be rebuilt
//! from storage after a restart. Background work (the expiry sweep and the
//! storage listener) and the 401 interceptor live in a `SessionScope`,
//! which tears all of it down when dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{ApiClient, LoginError, ResponseInterceptor, UnauthorizedInterceptor};

use super::navigation::{AdminRoutes, NavigationMode, Navigator};
use super::storage::{SessionStore, StorageEvent, MARKER_KEY, MARKER_SET, TOKEN_KEY};
use super::token::{self, Claims};

/// Default time between expiry sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Source of "now" for expiry checks
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Initial validation has not run yet
    Loading,
    Authenticated,
    Unauthenticated,
}

impl AuthState {
    pub fn is_loading(self) -> bool {
        self == AuthState::Loading
    }

    pub fn is_authenticated(self) -> bool {
        self == AuthState::Authenticated
    }

    pub fn label(self) -> &'static str {
        match self {
            AuthState::Loading => "loading",
            AuthState::Authenticated => "authenticated",
            AuthState::Unauthenticated => "not logged in",
        }
    }
}

pub struct SessionGuard {
    store: Arc<dyn SessionStore>,
    navigator: Arc<dyn Navigator>,
    routes: AdminRoutes,
    api: ApiClient,
    clock: Clock,
    state: watch::Sender<AuthState>,
}

impl SessionGuard {
    /// Create a guard in the `Loading` state. Nothing is read until
    /// `start` (or an explicit `validate`).
    pub fn new(
        store: Arc<dyn SessionStore>,
        navigator: Arc<dyn Navigator>,
        routes: AdminRoutes,
        api: ApiClient,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::Loading);
        Self {
            store,
            navigator,
            routes,
            api,
            clock: Arc::new(Utc::now),
            state,
        }
    }

    /// Replace the clock used for expiry checks
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run the initial validation and start background work.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self, sweep_interval: Duration) -> SessionScope {
        let guard = Arc::new(self);

        // Subscribe before validating so no change slips between the two
        let events = guard.store.subscribe();
        let initial = guard.validate();
        info!(state = ?initial, "Session initialized");

        let sweep = tokio::spawn(run_sweep(Arc::clone(&guard), sweep_interval));
        let listener = tokio::spawn(run_storage_listener(Arc::clone(&guard), events));

        let on_unauthorized = Arc::clone(&guard);
        let interceptor = Arc::new(UnauthorizedInterceptor::new(
            guard.api.base_url().clone(),
            move |url: &Url| on_unauthorized.handle_unauthorized(url),
        ));
        let api = guard
            .api
            .with_token_source(Arc::clone(&guard.store))
            .with_interceptor(Arc::clone(&interceptor) as Arc<dyn ResponseInterceptor>);

        SessionScope {
            guard,
            api,
            interceptor,
            sweep,
            listener,
        }
    }

    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    pub fn is_loading(&self) -> bool {
        self.state().is_loading()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    /// Watch state changes; only real transitions are published
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn routes(&self) -> &AdminRoutes {
        &self.routes
    }

    pub(crate) fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    /// Stored token, if any. Empty values count as absent.
    pub fn token(&self) -> Option<String> {
        self.read_key(TOKEN_KEY).filter(|t| !t.is_empty())
    }

    /// Decoded claims of the stored token
    pub fn claims(&self) -> Option<Claims> {
        self.token().and_then(|t| token::decode(&t))
    }

    /// True when a token is stored and it has expired
    pub fn token_expired(&self) -> bool {
        self.token()
            .is_some_and(|t| token::is_expired_at(&t, (self.clock)()))
    }

    /// Re-derive the state from storage.
    ///
    /// An expired token purges both keys; a marker without a token is
    /// purged too. Storage is only written when something must be removed,
    /// so repeated calls are free of side effects.
    pub fn validate(&self) -> AuthState {
        let next = match self.token() {
            Some(token) if token::is_expired_at(&token, (self.clock)()) => {
                info!("Stored token has expired, clearing session");
                self.purge();
                AuthState::Unauthenticated
            }
            Some(_) => AuthState::Authenticated,
            None => {
                if self.marker_set() {
                    debug!("Legacy marker without a token, clearing it");
                    self.remove_key(MARKER_KEY);
                }
                AuthState::Unauthenticated
            }
        };
        self.set_state(next);
        next
    }

    /// Log in against the admin API.
    ///
    /// State is left alone on failure and while the request is in flight.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), LoginError> {
        let token = self.api.authenticate(email, password).await?;

        if let Err(e) = self.store.set(TOKEN_KEY, &token) {
            warn!(error = %e, "Failed to store token");
            return Err(LoginError::Storage(e.to_string()));
        }
        if let Err(e) = self.store.set(MARKER_KEY, MARKER_SET) {
            warn!(error = %e, "Failed to store legacy marker");
        }

        self.set_state(AuthState::Authenticated);
        Ok(())
    }

    /// Forget the session. Safe to call repeatedly.
    pub fn logout(&self) {
        self.purge();
        self.set_state(AuthState::Unauthenticated);
    }

    /// Send the admin back to the login view with a full navigation, but
    /// only from inside the admin area and not from the login view itself.
    pub(crate) fn force_login_redirect(&self) {
        let current = self.navigator.current_path();
        if self.routes.contains(&current) && !self.routes.is_login(&current) {
            info!(from = %current, to = %self.routes.login_path(), "Redirecting to login");
            self.navigator
                .navigate(self.routes.login_path(), NavigationMode::Reload);
        }
    }

    fn handle_unauthorized(&self, url: &Url) {
        warn!(%url, "API rejected the session, logging out");
        self.logout();
        self.force_login_redirect();
    }

    /// One pass of the periodic expiry check
    fn sweep(&self) {
        if !self.is_authenticated() {
            return;
        }
        if self.token_expired() {
            info!("Session expired during sweep");
            self.logout();
            self.force_login_redirect();
        }
    }

    fn set_state(&self, next: AuthState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!(from = ?*current, to = ?next, "Session state changed");
            *current = next;
            true
        });
    }

    fn marker_set(&self) -> bool {
        self.read_key(MARKER_KEY).as_deref() == Some(MARKER_SET)
    }

    fn purge(&self) {
        self.remove_key(TOKEN_KEY);
        self.remove_key(MARKER_KEY);
    }

    /// Unreadable storage counts as an absent value
    fn read_key(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read session storage");
                None
            }
        }
    }

    fn remove_key(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!(key, error = %e, "Failed to clear session storage");
        }
    }
}

async fn run_sweep(guard: Arc<SessionGuard>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        guard.sweep();
    }
}

async fn run_storage_listener(guard: Arc<SessionGuard>, mut events: broadcast::Receiver<StorageEvent>) {
    loop {
        match events.recv().await {
            Ok(event) if event.is_session_key() => {
                debug!(key = %event.key, "Session storage changed");
                guard.validate();
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Storage listener lagged, re-validating");
                guard.validate();
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Lifetime of a running session guard.
///
/// Hands out the intercepted API client. Dropping the scope (or calling
/// `shutdown`) stops the sweep and the storage listener and disarms the
/// interceptor, after which clients obtained from `api()` behave like
/// plain ones.
pub struct SessionScope {
    guard: Arc<SessionGuard>,
    api: ApiClient,
    interceptor: Arc<UnauthorizedInterceptor>,
    sweep: JoinHandle<()>,
    listener: JoinHandle<()>,
}

impl SessionScope {
    pub fn guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }

    /// API client that attaches the stored token and logs out on 401
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn shutdown(self) {
        // Drop does the work
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        self.sweep.abort();
        self.listener.abort();
        self.interceptor.disarm();
        debug!("Session scope torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::navigation::Navigation;
    use crate::auth::storage::MemoryStore;
    use crate::test_support::{fixture, fixture_with_store, token_expiring_in, token_with_payload, Fixture};
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const API: &str = "http://localhost:5000/api";

    /// Let spawned tasks run until `done` holds (or give up)
    async fn settle(done: impl Fn() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_new_guard_is_loading() {
        let fx = fixture(API, "/admin");
        assert_eq!(fx.guard.state(), AuthState::Loading);
        assert!(fx.guard.is_loading());
    }

    #[test]
    fn test_validate_empty_storage() {
        let fx = fixture(API, "/admin");
        assert_eq!(fx.guard.validate(), AuthState::Unauthenticated);
        assert_eq!(fx.store.writes(), 0);
    }

    #[test]
    fn test_validate_expired_token_clears_both_keys() {
        let fx = fixture(API, "/admin");
        fx.store.set(TOKEN_KEY, &token_expiring_in(-60)).unwrap();
        fx.store.set(MARKER_KEY, MARKER_SET).unwrap();

        assert_eq!(fx.guard.validate(), AuthState::Unauthenticated);
        assert_eq!(fx.store.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(fx.store.get(MARKER_KEY).unwrap(), None);
    }

    #[test]
    fn test_validate_marker_without_token() {
        let fx = fixture(API, "/admin");
        fx.store.set(MARKER_KEY, MARKER_SET).unwrap();

        assert_eq!(fx.guard.validate(), AuthState::Unauthenticated);
        assert_eq!(fx.store.get(MARKER_KEY).unwrap(), None);
    }

    #[test]
    fn test_validate_malformed_token_is_purged() {
        let fx = fixture(API, "/admin");
        fx.store.set(TOKEN_KEY, "garbage").unwrap();
        fx.store.set(MARKER_KEY, MARKER_SET).unwrap();

        assert_eq!(fx.guard.validate(), AuthState::Unauthenticated);
        assert_eq!(fx.store.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_validate_valid_token_without_marker() {
        let fx = fixture(API, "/admin");
        fx.store.set(TOKEN_KEY, &token_expiring_in(600)).unwrap();
        assert_eq!(fx.guard.validate(), AuthState::Authenticated);
    }

    #[test]
    fn test_validate_is_idempotent() {
        let fx = fixture(API, "/admin");
        fx.store.set(TOKEN_KEY, &token_expiring_in(600)).unwrap();
        fx.store.set(MARKER_KEY, MARKER_SET).unwrap();
        let writes = fx.store.writes();

        assert_eq!(fx.guard.validate(), AuthState::Authenticated);
        assert_eq!(fx.guard.validate(), AuthState::Authenticated);
        assert_eq!(fx.store.writes(), writes);

        fx.store.set(TOKEN_KEY, &token_expiring_in(-1)).unwrap();
        assert_eq!(fx.guard.validate(), AuthState::Unauthenticated);
        let writes = fx.store.writes();
        assert_eq!(fx.guard.validate(), AuthState::Unauthenticated);
        assert_eq!(fx.store.writes(), writes);
    }

    #[test]
    fn test_token_without_exp_is_trusted() {
        let fx = fixture(API, "/admin");
        fx.store
            .set(TOKEN_KEY, &token_with_payload(&json!({"role": "admin"})))
            .unwrap();
        assert_eq!(fx.guard.validate(), AuthState::Authenticated);
        assert!(!fx.guard.token_expired());
    }

    #[test]
    fn test_logout_is_idempotent() {
        let fx = fixture(API, "/admin/news");
        fx.store.set(TOKEN_KEY, &token_expiring_in(600)).unwrap();
        fx.store.set(MARKER_KEY, MARKER_SET).unwrap();
        fx.guard.validate();

        fx.guard.logout();
        assert_eq!(fx.guard.state(), AuthState::Unauthenticated);
        let writes = fx.store.writes();

        fx.guard.logout();
        assert_eq!(fx.store.writes(), writes);
        // Logging out alone never navigates
        assert!(fx.navigator.history().is_empty());
    }

    #[test]
    fn test_state_changes_are_published_once() {
        let fx = fixture(API, "/admin");
        let mut rx = fx.guard.subscribe();
        fx.guard.validate();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), AuthState::Unauthenticated);

        fx.guard.validate();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_start_leaves_loading() {
        let fx = fixture(API, "/admin");
        fx.store.set(TOKEN_KEY, &token_expiring_in(600)).unwrap();
        let scope = fx.guard.start(DEFAULT_SWEEP_INTERVAL);
        assert_eq!(scope.guard().state(), AuthState::Authenticated);
        assert!(!scope.guard().is_loading());
    }

    #[tokio::test]
    async fn test_login_persists_token_and_marker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/admin/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "token": "t"
            })))
            .mount(&server)
            .await;

        let fx = fixture(&format!("{}/api", server.uri()), "/admin/login");
        let scope = fx.guard.start(DEFAULT_SWEEP_INTERVAL);
        assert_eq!(scope.guard().state(), AuthState::Unauthenticated);

        scope.guard().login("a@b.com", "pw").await.unwrap();

        assert_eq!(scope.guard().state(), AuthState::Authenticated);
        assert_eq!(fx.store.get(TOKEN_KEY).unwrap().as_deref(), Some("t"));
        assert_eq!(fx.store.get(MARKER_KEY).unwrap().as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_failed_login_leaves_state_alone() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/admin/login"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "success": false,
                "message": "Invalid credentials"
            })))
            .mount(&server)
            .await;

        let fx = fixture(&format!("{}/api", server.uri()), "/admin/login");
        let scope = fx.guard.start(DEFAULT_SWEEP_INTERVAL);

        let result = scope.guard().login("a@b.com", "nope").await;
        assert_eq!(result, Err(LoginError::Rejected("Invalid credentials".to_string())));
        assert_eq!(scope.guard().state(), AuthState::Unauthenticated);
        assert_eq!(fx.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_api_401_logs_out_and_redirects_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/contacts"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let fx = fixture(&format!("{}/api", server.uri()), "/admin/news");
        fx.store.set(TOKEN_KEY, &token_expiring_in(600)).unwrap();
        fx.store.set(MARKER_KEY, MARKER_SET).unwrap();
        let scope = fx.guard.start(DEFAULT_SWEEP_INTERVAL);
        assert_eq!(scope.guard().state(), AuthState::Authenticated);

        let result = scope.api().list_contacts().await;
        assert!(matches!(result, Err(crate::api::ApiError::SessionRejected)));

        assert_eq!(scope.guard().state(), AuthState::Unauthenticated);
        assert_eq!(fx.store.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(fx.store.get(MARKER_KEY).unwrap(), None);
        assert_eq!(
            fx.navigator.history(),
            vec![Navigation {
                path: "/admin/login".to_string(),
                mode: NavigationMode::Reload,
            }]
        );
    }

    #[tokio::test]
    async fn test_401_outside_api_base_is_ignored() {
        let api_server = MockServer::start().await;
        let other_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/contacts"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&other_server)
            .await;

        let fx = fixture(&format!("{}/api", api_server.uri()), "/admin/news");
        fx.store.set(TOKEN_KEY, &token_expiring_in(600)).unwrap();
        let scope = fx.guard.start(DEFAULT_SWEEP_INTERVAL);

        let url = Url::parse(&format!("{}/api/contacts", other_server.uri())).unwrap();
        let response = scope
            .api()
            .execute(reqwest::Request::new(reqwest::Method::GET, url))
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
        assert_eq!(scope.guard().state(), AuthState::Authenticated);
        assert!(fx.store.get(TOKEN_KEY).unwrap().is_some());
        assert!(fx.navigator.history().is_empty());
    }

    #[tokio::test]
    async fn test_401_on_public_page_does_not_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/contacts"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let fx = fixture(&format!("{}/api", server.uri()), "/events");
        fx.store.set(TOKEN_KEY, &token_expiring_in(600)).unwrap();
        let scope = fx.guard.start(DEFAULT_SWEEP_INTERVAL);

        let _ = scope.api().list_contacts().await;
        assert_eq!(scope.guard().state(), AuthState::Unauthenticated);
        assert!(fx.navigator.history().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_restores_plain_client() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/contacts"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let fx = fixture(&format!("{}/api", server.uri()), "/admin/news");
        fx.store.set(TOKEN_KEY, &token_expiring_in(600)).unwrap();
        let scope = fx.guard.start(DEFAULT_SWEEP_INTERVAL);
        let api = scope.api().clone();
        let guard = Arc::clone(scope.guard());

        scope.shutdown();
        let _ = api.list_contacts().await;

        assert_eq!(guard.state(), AuthState::Authenticated);
        assert!(fx.store.get(TOKEN_KEY).unwrap().is_some());
        assert_eq!(fx.navigator.count("/admin/login", NavigationMode::Reload), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_logs_out_expired_session() {
        let offset = Arc::new(AtomicI64::new(0));
        let clock_offset = Arc::clone(&offset);
        let clock: Clock =
            Arc::new(move || Utc::now() + chrono::Duration::seconds(clock_offset.load(Ordering::SeqCst)));

        let Fixture {
            store,
            navigator,
            guard,
        } = fixture(API, "/admin/events");
        store.set(TOKEN_KEY, &token_expiring_in(60)).unwrap();
        store.set(MARKER_KEY, MARKER_SET).unwrap();

        let scope = guard.with_clock(clock).start(DEFAULT_SWEEP_INTERVAL);
        assert!(scope.guard().is_authenticated());

        // Token lapses without any storage notification
        offset.store(120, Ordering::SeqCst);

        tokio::time::sleep(DEFAULT_SWEEP_INTERVAL - Duration::from_secs(1)).await;
        assert!(scope.guard().is_authenticated());

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle(|| !scope.guard().is_authenticated()).await;

        assert_eq!(scope.guard().state(), AuthState::Unauthenticated);
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(navigator.count("/admin/login", NavigationMode::Reload), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_valid_session() {
        let fx = fixture(API, "/admin/events");
        fx.store.set(TOKEN_KEY, &token_expiring_in(3600)).unwrap();
        let scope = fx.guard.start(DEFAULT_SWEEP_INTERVAL);

        tokio::time::sleep(DEFAULT_SWEEP_INTERVAL * 2 + Duration::from_secs(1)).await;
        assert!(scope.guard().is_authenticated());
        assert!(fx.navigator.history().is_empty());
    }

    #[tokio::test]
    async fn test_other_guard_logout_propagates() {
        let store = Arc::new(MemoryStore::new());
        store.set(TOKEN_KEY, &token_expiring_in(600)).unwrap();
        store.set(MARKER_KEY, MARKER_SET).unwrap();

        let first = fixture_with_store(API, "/admin/news", Arc::clone(&store));
        let second = fixture_with_store(API, "/admin/events", Arc::clone(&store));
        let first_scope = first.guard.start(DEFAULT_SWEEP_INTERVAL);
        let second_scope = second.guard.start(DEFAULT_SWEEP_INTERVAL);
        assert!(second_scope.guard().is_authenticated());

        first_scope.guard().logout();
        settle(|| !second_scope.guard().is_authenticated()).await;

        assert_eq!(second_scope.guard().state(), AuthState::Unauthenticated);
        // Storage-driven changes never navigate
        assert!(second.navigator.history().is_empty());
    }

    #[tokio::test]
    async fn test_token_written_elsewhere_authenticates() {
        let fx = fixture(API, "/admin/login");
        let scope = fx.guard.start(DEFAULT_SWEEP_INTERVAL);
        assert_eq!(scope.guard().state(), AuthState::Unauthenticated);

        fx.store.set(TOKEN_KEY, &token_expiring_in(600)).unwrap();
        settle(|| scope.guard().is_authenticated()).await;
        assert_eq!(scope.guard().state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_unrelated_keys_are_ignored() {
        let fx = fixture(API, "/admin");
        let scope = fx.guard.start(DEFAULT_SWEEP_INTERVAL);
        let rx = scope.guard().subscribe();

        // A token that only a re-validation would notice
        fx.store.set_quietly(TOKEN_KEY, &token_expiring_in(600));
        fx.store.set("theme", "dark").unwrap();
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        assert!(!rx.has_changed().unwrap());
        assert_eq!(scope.guard().state(), AuthState::Unauthenticated);
    }
}
