//! Client runtime wiring.
//!
//! Centralizes construction of the session stack so startup code and the UI
//! shell use one shared authority for store, transport, engine, and guard.

use crate::{RouteGuard, RouteGuardConfig};
use auth_engine::{AuthEngine, AuthResult};
use portal_config_and_utils::{init_logging, Config, Paths};
use portal_transport::ApiClient;
use session_store::SessionStore;
use std::sync::Arc;
use tracing::info;

/// The composed session-lifecycle stack for one client context.
pub struct ClientRuntime {
    pub store: Arc<SessionStore>,
    pub api: Arc<ApiClient>,
    pub engine: Arc<AuthEngine>,
    pub guard: Arc<RouteGuard>,
}

impl ClientRuntime {
    /// Build the stack from configuration.
    pub fn from_config(config: &Config, paths: &Paths) -> AuthResult<Self> {
        init_logging(&config.log_level);

        let store = Arc::new(SessionStore::open(paths)?);
        let api = Arc::new(ApiClient::new(
            config.api_base_url.clone(),
            Arc::clone(&store),
        ));
        let engine = Arc::new(AuthEngine::new(Arc::clone(&store), Arc::clone(&api)));
        let guard = Arc::new(RouteGuard::new(
            Arc::clone(&engine),
            Arc::clone(&store),
            Arc::clone(&api),
            RouteGuardConfig::default(),
        ));

        info!(api_base_url = %config.api_base_url, "Client runtime ready");
        Ok(Self {
            store,
            api,
            engine,
            guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth_engine::AuthStatus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_runtime_wires_shared_store() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let config = Config::default();

        let runtime = ClientRuntime::from_config(&config, &paths).unwrap();

        assert_eq!(runtime.engine.status(), AuthStatus::Idle);
        assert!(runtime.store.read().unwrap().is_none());
        assert!(paths.session_dir().exists());
    }
}
