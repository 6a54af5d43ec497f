//! Gating of protected views.

use crate::bootstrap::{Bootstrap, BootstrapConfig, CancelFlag};
use auth_engine::{AuthAction, AuthEngine, AuthResult, AuthStatus, ExpiryPollHandle};
use portal_transport::ApiClient;
use serde::{Deserialize, Serialize};
use session_store::{DurableWatchHandle, SessionEvent, SessionStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the protected view should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardState {
    /// Bootstrap in progress; show a loading state.
    Checking,
    /// Authenticated; render the protected content.
    Allowed,
    /// Not authenticated; redirect to login.
    Denied,
}

/// Configuration for the route guard.
#[derive(Debug, Clone)]
pub struct RouteGuardConfig {
    /// Log out after this long without user activity.
    pub inactivity_timeout: Duration,
    /// Poll interval for durable-tier changes made by other contexts.
    pub durable_watch_interval: Duration,
    /// Bootstrap behavior.
    pub bootstrap: BootstrapConfig,
    /// Capacity of the guard-state broadcast channel.
    pub event_capacity: usize,
}

impl Default for RouteGuardConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(30 * 60),
            durable_watch_interval: session_store::DEFAULT_WATCH_INTERVAL,
            bootstrap: BootstrapConfig::default(),
            event_capacity: 16,
        }
    }
}

/// Handle for an activated guard.
///
/// Dropping it tears down every listener and timer the activation spawned,
/// so handlers never accumulate across re-activations.
pub struct GuardHandle {
    tasks: Vec<JoinHandle<()>>,
    _watch: DurableWatchHandle,
    _poll: ExpiryPollHandle,
}

impl GuardHandle {
    /// Tear down the guard's tasks and subscriptions.
    pub fn shutdown(self) {}
}

impl Drop for GuardHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Guard state plus its event channel, shared with the listener tasks.
struct GuardShared {
    state: Mutex<GuardState>,
    events: broadcast::Sender<GuardState>,
}

impl GuardShared {
    fn set_state(&self, new_state: GuardState) {
        let mut state = self.state.lock().unwrap();
        if *state == new_state {
            return;
        }
        *state = new_state;
        drop(state);

        debug!(?new_state, "Guard state changed");
        let _ = self.events.send(new_state);
    }
}

/// Gate for protected views.
///
/// Composes bootstrap, the auth engine, and session events: hydrates on
/// activation, tracks the auth status as a [`GuardState`], reacts to session
/// events from this and other contexts, and enforces an inactivity timeout.
pub struct RouteGuard {
    engine: Arc<AuthEngine>,
    store: Arc<SessionStore>,
    bootstrap: Bootstrap,
    config: RouteGuardConfig,
    shared: Arc<GuardShared>,
    activity: Arc<Notify>,
    current_cancel: Mutex<Option<CancelFlag>>,
}

impl RouteGuard {
    pub fn new(
        engine: Arc<AuthEngine>,
        store: Arc<SessionStore>,
        api: Arc<ApiClient>,
        config: RouteGuardConfig,
    ) -> Self {
        let bootstrap = Bootstrap::new(
            Arc::clone(&engine),
            Arc::clone(&store),
            api,
            config.bootstrap.clone(),
        );
        let (events, _) = broadcast::channel(config.event_capacity);

        Self {
            engine,
            store,
            bootstrap,
            config,
            shared: Arc::new(GuardShared {
                state: Mutex::new(GuardState::Checking),
                events,
            }),
            activity: Arc::new(Notify::new()),
            current_cancel: Mutex::new(None),
        }
    }

    /// Current guard state.
    pub fn state(&self) -> GuardState {
        *self.shared.state.lock().unwrap()
    }

    /// Subscribe to guard state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<GuardState> {
        self.shared.events.subscribe()
    }

    /// Record user activity, deferring the inactivity timeout.
    pub fn record_activity(&self) {
        self.activity.notify_waiters();
    }

    /// Activate the guard: bootstrap auth state, then start the session
    /// event listeners, the cross-context watcher, the expiry poll, and the
    /// inactivity timer.
    ///
    /// A new activation supersedes any in-flight bootstrap; only the newest
    /// one's result is applied.
    pub async fn activate(&self) -> AuthResult<GuardHandle> {
        let cancel = {
            let mut current = self.current_cancel.lock().unwrap();
            if let Some(previous) = current.take() {
                previous.cancel();
            }
            let cancel = CancelFlag::new();
            *current = Some(cancel.clone());
            cancel
        };

        self.shared.set_state(GuardState::Checking);

        match self.bootstrap.run(&cancel).await {
            Ok(status) if !cancel.is_cancelled() => {
                self.shared.set_state(map_status(status));
            }
            Ok(_) => {
                // Superseded; the newer activation owns the state
            }
            Err(e) => {
                self.shared.set_state(GuardState::Denied);
                return Err(e);
            }
        }

        let watch = Arc::clone(&self.store).spawn_durable_watch(self.config.durable_watch_interval);
        let poll = Arc::clone(&self.engine).spawn_expiry_poll();
        let tasks = vec![self.spawn_event_listener(), self.spawn_inactivity_timer()];

        Ok(GuardHandle {
            tasks,
            _watch: watch,
            _poll: poll,
        })
    }

    /// Listen for auth status changes and session store events.
    fn spawn_event_listener(&self) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let store = Arc::clone(&self.store);
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            let mut auth_rx = engine.subscribe();
            let mut store_rx = store.subscribe();

            loop {
                tokio::select! {
                    event = auth_rx.recv() => match event {
                        Ok(changed) => shared.set_state(map_status(changed.status)),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    event = store_rx.recv() => match event {
                        Ok(SessionEvent::Cleared) => {
                            if engine.status().is_authenticated() {
                                info!("Session cleared, revoking access");
                                let _ = engine.dispatch(AuthAction::Logout);
                            }
                            shared.set_state(GuardState::Denied);
                        }
                        Ok(SessionEvent::Updated(record)) => {
                            if let Err(e) = engine.reconcile(&record) {
                                warn!(error = %e, "Failed to reconcile session update");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Log out after the configured period without user activity.
    fn spawn_inactivity_timer(&self) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let activity = Arc::clone(&self.activity);
        let timeout = self.config.inactivity_timeout;

        tokio::spawn(async move {
            loop {
                let notified = activity.notified();
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        if engine.status().is_authenticated() {
                            info!(
                                timeout_secs = timeout.as_secs(),
                                "Inactivity timeout reached, logging out"
                            );
                            if let Err(e) = engine.logout() {
                                warn!(error = %e, "Inactivity logout failed");
                            }
                        }
                    }
                    _ = notified => {
                        // Timer resets on the next loop iteration
                    }
                }
            }
        })
    }
}

fn map_status(status: AuthStatus) -> GuardState {
    match status {
        AuthStatus::Idle | AuthStatus::Loading => GuardState::Checking,
        AuthStatus::Authenticated => GuardState::Allowed,
        AuthStatus::Unauthenticated => GuardState::Denied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_transport::RetryConfig;
    use session_store::{FileTier, MemoryTier, UserSnapshot};
    use tempfile::tempdir;
    use tokio::time::timeout as tokio_timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(3);

    fn user() -> UserSnapshot {
        UserSnapshot {
            user_id: "user-123".to_string(),
            email: "member@example.com".to_string(),
            display_name: Some("Jane".to_string()),
        }
    }

    fn store_with_durable(dir: &std::path::Path) -> Arc<SessionStore> {
        Arc::new(SessionStore::new(
            Box::new(MemoryTier::new()),
            Box::new(FileTier::new(dir.to_path_buf()).unwrap()),
        ))
    }

    fn memory_store() -> Arc<SessionStore> {
        Arc::new(SessionStore::new(
            Box::new(MemoryTier::new()),
            Box::new(MemoryTier::new()),
        ))
    }

    fn guard_over(store: Arc<SessionStore>, config: RouteGuardConfig) -> Arc<RouteGuard> {
        // Unreachable API: revokes and refreshes fail fast and are ignored
        let api = Arc::new(ApiClient::with_retry_config(
            "http://127.0.0.1:9",
            Arc::clone(&store),
            RetryConfig {
                max_attempts: 1,
                backoff_base: Duration::from_millis(1),
                backoff_max: Duration::from_millis(1),
            },
        ));
        let engine = Arc::new(AuthEngine::new(Arc::clone(&store), Arc::clone(&api)));
        Arc::new(RouteGuard::new(engine, store, api, config))
    }

    fn fast_config() -> RouteGuardConfig {
        RouteGuardConfig {
            inactivity_timeout: Duration::from_secs(60),
            durable_watch_interval: Duration::from_millis(20),
            bootstrap: BootstrapConfig {
                max_attempts: 2,
                retry_delay: Duration::from_millis(10),
                ..Default::default()
            },
            event_capacity: 16,
        }
    }

    fn seed(store: &SessionStore) {
        store
            .persist(
                "opaque-token",
                Some(chrono::Utc::now().timestamp() + 3600),
                user(),
                true,
                None,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_activate_with_session_allows() {
        let store = memory_store();
        seed(&store);
        let guard = guard_over(store, fast_config());

        let _handle = guard.activate().await.unwrap();
        assert_eq!(guard.state(), GuardState::Allowed);
    }

    #[tokio::test]
    async fn test_activate_without_session_denies() {
        let guard = guard_over(memory_store(), fast_config());

        let _handle = guard.activate().await.unwrap();
        assert_eq!(guard.state(), GuardState::Denied);
    }

    #[tokio::test]
    async fn test_inactivity_timeout_logs_out_exactly_once() {
        let store = memory_store();
        seed(&store);
        let mut config = fast_config();
        config.inactivity_timeout = Duration::from_millis(80);
        let guard = guard_over(store, config);

        let mut auth_rx = guard.engine.subscribe();
        let _handle = guard.activate().await.unwrap();
        assert_eq!(guard.state(), GuardState::Allowed);

        // Wait for the forced logout
        let changed = tokio_timeout(RECV_TIMEOUT, async {
            loop {
                let event = auth_rx.recv().await.unwrap();
                if event.status == AuthStatus::Unauthenticated {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(changed.status, AuthStatus::Unauthenticated);
        assert!(guard.store.read().unwrap().is_none());

        // No second logout fires afterwards
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(guard.engine.status(), AuthStatus::Unauthenticated);
        assert!(matches!(
            auth_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(guard.state(), GuardState::Denied);
    }

    #[tokio::test]
    async fn test_activity_defers_inactivity_timeout() {
        let store = memory_store();
        seed(&store);
        let mut config = fast_config();
        config.inactivity_timeout = Duration::from_millis(150);
        let guard = guard_over(store, config);

        let _handle = guard.activate().await.unwrap();

        // Keep poking well inside the timeout window
        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            guard.record_activity();
        }
        assert_eq!(guard.state(), GuardState::Allowed);

        // Go idle and the timeout fires
        let mut rx = guard.subscribe();
        let state = tokio_timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(state, GuardState::Denied);
    }

    #[tokio::test]
    async fn test_cross_context_clear_denies() {
        let dir = tempdir().unwrap();
        let writer = store_with_durable(dir.path());
        seed(&writer);

        let guard = guard_over(store_with_durable(dir.path()), fast_config());
        let _handle = guard.activate().await.unwrap();
        assert_eq!(guard.state(), GuardState::Allowed);

        let mut rx = guard.subscribe();
        // Another context logs out
        writer.clear().unwrap();

        let state = tokio_timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(state, GuardState::Denied);
        assert_eq!(guard.engine.status(), AuthStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn test_cross_context_rotation_reconciles() {
        let dir = tempdir().unwrap();
        let writer = store_with_durable(dir.path());
        seed(&writer);

        let guard = guard_over(store_with_durable(dir.path()), fast_config());
        let _handle = guard.activate().await.unwrap();
        assert_eq!(guard.state(), GuardState::Allowed);

        // Another context rotates the token
        writer
            .persist(
                "rotated-token",
                Some(chrono::Utc::now().timestamp() + 7200),
                user(),
                true,
                None,
            )
            .unwrap();

        tokio_timeout(RECV_TIMEOUT, async {
            loop {
                if guard.engine.snapshot().token.as_deref() == Some("rotated-token") {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(guard.state(), GuardState::Allowed);
    }

    #[tokio::test]
    async fn test_guard_state_events_on_activate() {
        let store = memory_store();
        seed(&store);
        let guard = guard_over(store, fast_config());

        let mut rx = guard.subscribe();
        let _handle = guard.activate().await.unwrap();

        // Initial state is already Checking, so the first event is Allowed
        let state = tokio_timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(state, GuardState::Allowed);
    }

    #[tokio::test]
    async fn test_shutdown_tears_down_listeners() {
        let store = memory_store();
        seed(&store);
        let guard = guard_over(Arc::clone(&store), fast_config());

        let handle = guard.activate().await.unwrap();
        assert_eq!(guard.state(), GuardState::Allowed);
        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // With listeners gone, a store clear no longer reaches the guard
        store.clear().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(guard.state(), GuardState::Allowed);
    }
}
