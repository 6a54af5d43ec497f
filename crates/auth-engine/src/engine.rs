//! Auth engine: actions, snapshot, and side-effect orchestration.

use crate::auth_fsm::{AuthMachine, AuthMachineInput, AuthStateChanged, AuthStatus};
use crate::{AuthError, AuthResult};
use portal_transport::{ApiClient, AuthSession, ProfileUpdate, TransportError};
use session_store::{SessionRecord, SessionStore, UserSnapshot, UserUpdate};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Denormalized view of the auth state held in memory.
///
/// The session store owns the canonical persisted copy; this snapshot is
/// reconciled from it on every init or explicit reload.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSnapshot {
    /// Current status.
    pub status: AuthStatus,
    /// User snapshot while authenticated.
    pub user: Option<UserSnapshot>,
    /// Access token while authenticated.
    pub token: Option<String>,
    /// Last credential error, surfaced to the UI.
    pub error: Option<String>,
}

impl AuthSnapshot {
    fn initial() -> Self {
        Self {
            status: AuthStatus::Idle,
            user: None,
            token: None,
            error: None,
        }
    }
}

/// Actions dispatched against the auth state.
#[derive(Debug, Clone)]
pub enum AuthAction {
    /// Bootstrap started, or login/signup went in flight.
    InitStart,
    /// Bootstrap found a valid session.
    InitSuccess { user: UserSnapshot, token: String },
    /// Login/signup succeeded.
    AuthSuccess { user: UserSnapshot, token: String },
    /// Bootstrap found no session. Expected, not an error condition.
    InitFail,
    /// Login/signup failed; the error is recorded for the UI.
    AuthFail(String),
    /// Session ended.
    Logout,
    /// Merge a partial user update; no-op unless authenticated.
    UpdateUser(UserUpdate),
    /// Clear the recorded error without changing status.
    ClearError,
}

/// Configuration for engine side effects.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Persist login/signup sessions to the durable tier. On by default;
    /// the per-login "remember me" choice is not plumbed through the
    /// current flows.
    pub remember_on_login: bool,
    /// Interval between expiry poll ticks.
    pub expiry_poll_interval: Duration,
    /// Ask the server to revoke every session on logout, not just this one.
    pub revoke_all_on_logout: bool,
    /// Capacity of the state-change broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remember_on_login: true,
            expiry_poll_interval: Duration::from_secs(60),
            revoke_all_on_logout: false,
            event_capacity: 16,
        }
    }
}

struct EngineState {
    fsm: AuthMachine,
    snapshot: AuthSnapshot,
}

/// Handle for a running expiry poll task.
pub struct ExpiryPollHandle {
    handle: JoinHandle<()>,
}

impl ExpiryPollHandle {
    /// Stop the poll task.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for ExpiryPollHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The single source of truth for authentication state.
///
/// All status changes go through [`AuthEngine::dispatch`], which drives the
/// FSM and the snapshot together and broadcasts every status change.
pub struct AuthEngine {
    store: Arc<SessionStore>,
    api: Arc<ApiClient>,
    state: Mutex<EngineState>,
    events: broadcast::Sender<AuthStateChanged>,
    config: EngineConfig,
}

impl AuthEngine {
    /// Create a new engine with default configuration.
    pub fn new(store: Arc<SessionStore>, api: Arc<ApiClient>) -> Self {
        Self::with_config(store, api, EngineConfig::default())
    }

    /// Create a new engine with custom configuration.
    pub fn with_config(
        store: Arc<SessionStore>,
        api: Arc<ApiClient>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            store,
            api,
            state: Mutex::new(EngineState {
                fsm: AuthMachine::new(),
                snapshot: AuthSnapshot::initial(),
            }),
            events,
            config,
        }
    }

    /// Subscribe to status change events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthStateChanged> {
        self.events.subscribe()
    }

    /// Current snapshot (clone).
    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.lock().unwrap().snapshot.clone()
    }

    /// Current status.
    pub fn status(&self) -> AuthStatus {
        self.state.lock().unwrap().snapshot.status
    }

    /// Apply an action: drive the FSM where the action maps to a transition,
    /// then update the snapshot. Actions are processed in dispatch order;
    /// the lock serializes concurrent dispatchers.
    pub fn dispatch(&self, action: AuthAction) -> AuthResult<AuthStatus> {
        let mut state = self.state.lock().unwrap();
        let old_status = state.snapshot.status;

        if let Some(input) = fsm_input(&action) {
            state.fsm.consume(&input).map_err(|_| {
                AuthError::InvalidStateTransition(format!(
                    "Cannot apply {:?} in state {:?}",
                    input,
                    state.fsm.state()
                ))
            })?;
            let status = AuthStatus::from(state.fsm.state());
            state.snapshot.status = status;
        }

        match action {
            AuthAction::InitStart => {}
            AuthAction::InitSuccess { user, token } | AuthAction::AuthSuccess { user, token } => {
                state.snapshot.user = Some(user);
                state.snapshot.token = Some(token);
                state.snapshot.error = None;
            }
            AuthAction::InitFail => {
                // Expected "no session" outcome; no error recorded.
                state.snapshot.user = None;
                state.snapshot.token = None;
            }
            AuthAction::AuthFail(error) => {
                state.snapshot.user = None;
                state.snapshot.token = None;
                state.snapshot.error = Some(error);
            }
            AuthAction::Logout => {
                state.snapshot.user = None;
                state.snapshot.token = None;
                state.snapshot.error = None;
            }
            AuthAction::UpdateUser(update) => {
                if state.snapshot.status.is_authenticated() {
                    if let Some(user) = state.snapshot.user.as_mut() {
                        user.apply(&update);
                    }
                }
            }
            AuthAction::ClearError => {
                state.snapshot.error = None;
            }
        }

        let new_status = state.snapshot.status;
        let payload = AuthStateChanged {
            status: new_status,
            user_id: state.snapshot.user.as_ref().map(|u| u.user_id.clone()),
            email: state.snapshot.user.as_ref().map(|u| u.email.clone()),
        };
        drop(state);

        if old_status != new_status {
            debug!(?old_status, ?new_status, "Auth status transition");
            let _ = self.events.send(payload);
        }

        Ok(new_status)
    }

    /// Login with email and password.
    ///
    /// On success the session is persisted (durable tier) and the expiry
    /// poll picks it up; on failure the error is recorded on the snapshot.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<AuthSnapshot> {
        self.dispatch(AuthAction::InitStart)?;

        match self.api.login(email, password).await {
            Ok(session) => self.adopt_session(session),
            Err(e) => self.fail_auth(e),
        }
    }

    /// Create an account. The response is a live session, so signup follows
    /// the same adoption path as login.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> AuthResult<AuthSnapshot> {
        self.dispatch(AuthAction::InitStart)?;

        match self.api.signup(email, password, display_name).await {
            Ok(session) => self.adopt_session(session),
            Err(e) => self.fail_auth(e),
        }
    }

    fn adopt_session(&self, session: AuthSession) -> AuthResult<AuthSnapshot> {
        let user: UserSnapshot = session.user.into();
        self.store.persist(
            &session.access_token,
            session.expires_at,
            user.clone(),
            self.config.remember_on_login,
            session.refresh_token,
        )?;
        self.dispatch(AuthAction::AuthSuccess {
            user,
            token: session.access_token,
        })?;

        info!("Authenticated");
        Ok(self.snapshot())
    }

    fn fail_auth(&self, e: TransportError) -> AuthResult<AuthSnapshot> {
        let error = credential_error(e);
        self.dispatch(AuthAction::AuthFail(error.to_string()))?;
        Err(error)
    }

    /// End the session.
    ///
    /// Server-side revoke is best-effort and fire-and-forget; local state is
    /// torn down regardless. Must be called within a tokio runtime.
    pub fn logout(&self) -> AuthResult<()> {
        if let Ok(Some(record)) = self.store.read() {
            let api = Arc::clone(&self.api);
            let revoke_all = self.config.revoke_all_on_logout;
            tokio::spawn(async move {
                if let Err(e) = api.revoke_session(&record.token, revoke_all).await {
                    debug!(error = %e, "Server-side revoke failed (ignored)");
                }
            });
        }

        self.store.clear()?;
        self.dispatch(AuthAction::Logout)?;

        info!("Logged out");
        Ok(())
    }

    /// Apply a profile change.
    ///
    /// An email change rotates the tokens server-side; the rotated
    /// credentials go through the same persist-and-broadcast path as login.
    pub async fn update_profile(&self, changes: ProfileUpdate) -> AuthResult<AuthSnapshot> {
        if !self.status().is_authenticated() {
            return Err(AuthError::NotAuthenticated);
        }

        let prior_refresh = self.store.read()?.and_then(|r| r.refresh_token);
        let response = self.api.update_profile(&changes).await?;
        let user: UserSnapshot = response.user.into();

        if let Some(token) = response.token {
            let remember = self.store.remembered()?;
            let refresh = response.refresh_token.or(prior_refresh);
            self.store
                .persist(&token, response.expires_at, user.clone(), remember, refresh)?;

            let mut state = self.state.lock().unwrap();
            state.snapshot.user = Some(user);
            state.snapshot.token = Some(token);
        } else {
            let update = UserUpdate {
                email: Some(user.email.clone()),
                display_name: user.display_name.clone(),
            };
            self.store.update_user(&update)?;
            self.dispatch(AuthAction::UpdateUser(update))?;
        }

        Ok(self.snapshot())
    }

    /// Adopt the canonical stored record into the in-memory snapshot.
    ///
    /// Used when another context rotated or created the session; the stored
    /// copy wins over whatever this context holds.
    pub fn reconcile(&self, record: &SessionRecord) -> AuthResult<()> {
        match self.status() {
            AuthStatus::Authenticated => {
                let mut state = self.state.lock().unwrap();
                state.snapshot.user = Some(record.user.clone());
                state.snapshot.token = Some(record.token.clone());
            }
            AuthStatus::Idle | AuthStatus::Unauthenticated => {
                self.dispatch(AuthAction::InitStart)?;
                self.dispatch(AuthAction::InitSuccess {
                    user: record.user.clone(),
                    token: record.token.clone(),
                })?;
            }
            AuthStatus::Loading => {
                // A bootstrap is in flight; it reads the store itself.
            }
        }
        Ok(())
    }

    /// One expiry poll tick against the current wall clock.
    pub fn expiry_tick(&self) -> AuthResult<bool> {
        self.expiry_tick_at(chrono::Utc::now().timestamp())
    }

    /// Clock-pinned variant of [`AuthEngine::expiry_tick`].
    ///
    /// Returns true when the session crossed its expiry boundary and a
    /// logout was forced. Expiry is an expected lifecycle event: the token
    /// is already dead, so there is no server revoke and no recorded error.
    pub fn expiry_tick_at(&self, now: i64) -> AuthResult<bool> {
        if !self.status().is_authenticated() {
            return Ok(false);
        }

        // read_at purges an expired record as a side effect
        if self.store.read_at(now)?.is_some() {
            return Ok(false);
        }

        info!("Session crossed expiry boundary, forcing logout");
        self.store.clear()?;
        self.dispatch(AuthAction::Logout)?;
        Ok(true)
    }

    /// Spawn the periodic expiry poll. Runs only while authenticated (ticks
    /// in other states are no-ops) and stops when the handle drops.
    pub fn spawn_expiry_poll(self: Arc<Self>) -> ExpiryPollHandle {
        let period = self.config.expiry_poll_interval;
        let engine = self;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = engine.expiry_tick() {
                    warn!(error = %e, "Expiry poll tick failed");
                }
            }
        });

        ExpiryPollHandle { handle }
    }
}

fn fsm_input(action: &AuthAction) -> Option<AuthMachineInput> {
    match action {
        AuthAction::InitStart => Some(AuthMachineInput::InitStart),
        AuthAction::InitSuccess { .. } => Some(AuthMachineInput::InitSuccess),
        AuthAction::AuthSuccess { .. } => Some(AuthMachineInput::AuthSuccess),
        AuthAction::InitFail => Some(AuthMachineInput::InitFail),
        AuthAction::AuthFail(_) => Some(AuthMachineInput::AuthFail),
        AuthAction::Logout => Some(AuthMachineInput::Logout),
        AuthAction::UpdateUser(_) | AuthAction::ClearError => None,
    }
}

/// Map a transport failure from login/signup to the user-facing taxonomy:
/// 4xx means the credentials were rejected, anything else stays a transport
/// problem and must not read as "wrong password".
fn credential_error(e: TransportError) -> AuthError {
    match e {
        TransportError::Api { status, message } if (400..500).contains(&status) => {
            AuthError::InvalidCredentials(message)
        }
        other => AuthError::Transport(other),
    }
}
