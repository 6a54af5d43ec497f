//! Startup hydration of auth state from persisted storage.

use auth_engine::{AuthAction, AuthEngine, AuthResult, AuthStatus};
use portal_transport::ApiClient;
use session_store::{SessionRecord, SessionStore, StorageResult, UserUpdate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the bootstrap sequence.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Maximum storage read attempts.
    pub max_attempts: u32,
    /// Delay between read attempts.
    pub retry_delay: Duration,
    /// Tokens expiring within this window skip the background profile
    /// refresh; the transport interceptor will refresh them on first use.
    pub expiring_soon_window_secs: i64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(100),
            expiring_soon_window_secs: token_codec::DEFAULT_EXPIRING_SOON_WINDOW_SECS,
        }
    }
}

/// Cancellation flag shared with in-flight bootstrap work.
///
/// Set on teardown or when a newer bootstrap supersedes this one; any result
/// arriving after cancellation is discarded without mutating state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read the stored session with bounded retries.
///
/// Storage may not be populated yet right after a redirect (the write races
/// the first read), so a short retry loop trades a small fixed latency for
/// eliminating false "not authenticated" results.
pub async fn read_with_retry(
    store: &SessionStore,
    max_attempts: u32,
    delay: Duration,
) -> StorageResult<Option<SessionRecord>> {
    for attempt in 0..max_attempts {
        if let Some(record) = store.read()? {
            return Ok(Some(record));
        }
        if attempt + 1 < max_attempts {
            debug!(attempt = attempt + 1, max_attempts, "No stored session yet, retrying");
            tokio::time::sleep(delay).await;
        }
    }
    Ok(None)
}

/// Startup hydration sequence.
pub struct Bootstrap {
    engine: Arc<AuthEngine>,
    store: Arc<SessionStore>,
    api: Arc<ApiClient>,
    config: BootstrapConfig,
}

impl Bootstrap {
    pub fn new(
        engine: Arc<AuthEngine>,
        store: Arc<SessionStore>,
        api: Arc<ApiClient>,
        config: BootstrapConfig,
    ) -> Self {
        Self {
            engine,
            store,
            api,
            config,
        }
    }

    /// Run the bootstrap.
    ///
    /// On a valid stored record the engine is hydrated optimistically from
    /// the cached user snapshot, and a background profile refresh replaces
    /// the snapshot unless the token is about to expire anyway. Background
    /// refresh failure is logged and swallowed; it never downgrades an
    /// authenticated state.
    pub async fn run(&self, cancel: &CancelFlag) -> AuthResult<AuthStatus> {
        self.engine.dispatch(AuthAction::InitStart)?;

        let record =
            read_with_retry(&self.store, self.config.max_attempts, self.config.retry_delay)
                .await?;

        if cancel.is_cancelled() {
            debug!("Bootstrap superseded, discarding result");
            return Ok(self.engine.status());
        }

        let Some(record) = record else {
            // Expected no-session case, not an error
            self.engine.dispatch(AuthAction::InitFail)?;
            return Ok(AuthStatus::Unauthenticated);
        };

        // Optimistic hydrate from the cached snapshot; the store already
        // validated token presence and non-expiry.
        self.engine.dispatch(AuthAction::InitSuccess {
            user: record.user.clone(),
            token: record.token.clone(),
        })?;

        if token_codec::will_expire_soon(&record.token, self.config.expiring_soon_window_secs) {
            debug!("Token expiring soon, skipping background profile refresh");
        } else {
            self.spawn_profile_refresh(cancel.clone());
        }

        Ok(AuthStatus::Authenticated)
    }

    /// Replace the cached user snapshot with a freshly fetched one.
    fn spawn_profile_refresh(&self, cancel: CancelFlag) {
        let engine = Arc::clone(&self.engine);
        let store = Arc::clone(&self.store);
        let api = Arc::clone(&self.api);

        tokio::spawn(async move {
            match api.profile().await {
                Ok(user) => {
                    if cancel.is_cancelled() {
                        debug!("Discarding stale profile refresh result");
                        return;
                    }
                    let update = UserUpdate {
                        email: Some(user.email.clone()),
                        display_name: user.display_name.clone(),
                    };
                    if let Err(e) = store.update_user(&update) {
                        warn!(error = %e, "Failed to persist refreshed profile");
                    }
                    let _ = engine.dispatch(AuthAction::UpdateUser(update));
                    debug!("Profile snapshot refreshed");
                }
                Err(e) => {
                    // Never downgrades an authenticated state
                    warn!(error = %e, "Background profile refresh failed (ignored)");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth_engine::AuthStatus;
    use portal_transport::RetryConfig;
    use session_store::{MemoryTier, UserSnapshot};

    fn make_store() -> Arc<SessionStore> {
        Arc::new(SessionStore::new(
            Box::new(MemoryTier::new()),
            Box::new(MemoryTier::new()),
        ))
    }

    fn make_engine(store: &Arc<SessionStore>, base_url: &str) -> (Arc<AuthEngine>, Arc<ApiClient>) {
        let api = Arc::new(ApiClient::with_retry_config(
            base_url,
            Arc::clone(store),
            RetryConfig {
                max_attempts: 1,
                backoff_base: Duration::from_millis(1),
                backoff_max: Duration::from_millis(1),
            },
        ));
        let engine = Arc::new(AuthEngine::new(Arc::clone(store), Arc::clone(&api)));
        (engine, api)
    }

    fn user() -> UserSnapshot {
        UserSnapshot {
            user_id: "user-123".to_string(),
            email: "member@example.com".to_string(),
            display_name: Some("Jane".to_string()),
        }
    }

    fn bootstrap_with(
        store: &Arc<SessionStore>,
        engine: &Arc<AuthEngine>,
        api: &Arc<ApiClient>,
        config: BootstrapConfig,
    ) -> Bootstrap {
        Bootstrap::new(
            Arc::clone(engine),
            Arc::clone(store),
            Arc::clone(api),
            config,
        )
    }

    fn fast_config() -> BootstrapConfig {
        BootstrapConfig {
            max_attempts: 3,
            retry_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bootstrap_no_session() {
        let store = make_store();
        let (engine, api) = make_engine(&store, "http://127.0.0.1:9");
        let bootstrap = bootstrap_with(&store, &engine, &api, fast_config());

        let status = bootstrap.run(&CancelFlag::new()).await.unwrap();
        assert_eq!(status, AuthStatus::Unauthenticated);

        // Silent no-session case: no error recorded
        assert!(engine.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn test_bootstrap_hydrates_from_cached_snapshot() {
        let store = make_store();
        let (engine, api) = make_engine(&store, "http://127.0.0.1:9");

        // An opaque token counts as expiring soon, so no profile fetch runs
        store
            .persist(
                "opaque-token",
                Some(chrono::Utc::now().timestamp() + 3600),
                user(),
                false,
                None,
            )
            .unwrap();

        let bootstrap = bootstrap_with(&store, &engine, &api, fast_config());
        let status = bootstrap.run(&CancelFlag::new()).await.unwrap();

        assert_eq!(status, AuthStatus::Authenticated);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.token.as_deref(), Some("opaque-token"));
        assert_eq!(snapshot.user.unwrap().user_id, "user-123");
    }

    #[tokio::test]
    async fn test_read_with_retry_sees_late_write() {
        let store = make_store();

        let writer = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(25)).await;
            writer
                .persist(
                    "late-token",
                    Some(chrono::Utc::now().timestamp() + 3600),
                    UserSnapshot {
                        user_id: "user-123".to_string(),
                        email: "member@example.com".to_string(),
                        display_name: None,
                    },
                    false,
                    None,
                )
                .unwrap();
        });

        let record = read_with_retry(&store, 5, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(record.unwrap().token, "late-token");
    }

    #[tokio::test]
    async fn test_read_with_retry_gives_up() {
        let store = make_store();
        let record = read_with_retry(&store, 3, Duration::from_millis(5))
            .await
            .unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_bootstrap_discards_result() {
        let store = make_store();
        let (engine, api) = make_engine(&store, "http://127.0.0.1:9");

        // Record exists, but the bootstrap is cancelled while it retries...
        // cancel before run: result must be discarded without state change
        let cancel = CancelFlag::new();
        cancel.cancel();

        store
            .persist(
                "opaque-token",
                Some(chrono::Utc::now().timestamp() + 3600),
                user(),
                false,
                None,
            )
            .unwrap();

        let bootstrap = bootstrap_with(&store, &engine, &api, fast_config());
        let status = bootstrap.run(&cancel).await.unwrap();

        // InitStart ran, but neither success nor failure was applied
        assert_eq!(status, AuthStatus::Loading);
        assert!(engine.snapshot().token.is_none());
    }

    #[tokio::test]
    async fn test_superseded_bootstrap_only_second_applies() {
        let store = make_store();
        let (engine, api) = make_engine(&store, "http://127.0.0.1:9");

        // First bootstrap: store is empty, so it sits in its retry loop
        let first_cancel = CancelFlag::new();
        let first = Arc::new(bootstrap_with(
            &store,
            &engine,
            &api,
            BootstrapConfig {
                max_attempts: 10,
                retry_delay: Duration::from_millis(30),
                ..Default::default()
            },
        ));
        let first_task = {
            let first = Arc::clone(&first);
            let cancel = first_cancel.clone();
            tokio::spawn(async move { first.run(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;

        // Session appears, and a second bootstrap supersedes the first
        store
            .persist(
                "opaque-token",
                Some(chrono::Utc::now().timestamp() + 3600),
                user(),
                false,
                None,
            )
            .unwrap();
        first_cancel.cancel();

        let second = bootstrap_with(&store, &engine, &api, fast_config());
        let status = second.run(&CancelFlag::new()).await.unwrap();
        assert_eq!(status, AuthStatus::Authenticated);

        // The first run finishes without applying anything on top
        first_task.await.unwrap().unwrap();
        assert_eq!(engine.status(), AuthStatus::Authenticated);
        assert_eq!(engine.snapshot().token.as_deref(), Some("opaque-token"));
    }

    #[tokio::test]
    async fn test_background_refresh_failure_never_downgrades() {
        let store = make_store();
        // Unreachable API: the background profile refresh will fail
        let (engine, api) = make_engine(&store, "http://127.0.0.1:9");

        // A decodable far-future token does trigger the background refresh
        let token = far_future_token();
        store
            .persist(&token, None, user(), false, None)
            .unwrap();

        let bootstrap = bootstrap_with(&store, &engine, &api, fast_config());
        let status = bootstrap.run(&CancelFlag::new()).await.unwrap();
        assert_eq!(status, AuthStatus::Authenticated);

        // Give the failed refresh time to land; state must stay authenticated
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.status(), AuthStatus::Authenticated);
        assert!(engine.snapshot().error.is_none());
    }

    fn far_future_token() -> String {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let claims = serde_json::json!({
            "userId": "user-123",
            "email": "member@example.com",
            "exp": chrono::Utc::now().timestamp() + 86_400,
        });
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        format!("{}.{}.sig", header, payload)
    }
}
