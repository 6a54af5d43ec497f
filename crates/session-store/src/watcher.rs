//! Cross-context durable-tier watcher.
//!
//! Durable-tier writes made by another execution context don't produce any
//! notification in this one, so the store polls the durable tier and
//! re-emits changes on its local event channel. The store's own durable
//! writes are skipped, matching platform storage-notification semantics
//! (the writing context never hears its own write).

use crate::{SessionEvent, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default interval between durable-tier polls.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Handle for a running durable watch task.
///
/// Aborts the task on [`DurableWatchHandle::shutdown`] or drop so watchers
/// never outlive their owner.
pub struct DurableWatchHandle {
    handle: JoinHandle<()>,
}

impl DurableWatchHandle {
    /// Stop the watch task.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for DurableWatchHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl SessionStore {
    /// Spawn a task that polls the durable tier and broadcasts externally
    /// made changes as local [`SessionEvent`]s.
    ///
    /// Cross-context ordering is eventual: a write in another context is
    /// observed within roughly one `poll_interval`, last write wins.
    pub fn spawn_durable_watch(self: Arc<Self>, poll_interval: Duration) -> DurableWatchHandle {
        let store = self;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            // Prime with the current value so pre-existing state is not
            // re-announced on startup.
            let mut last_seen = store
                .durable
                .get(&store.config.remembered_session_key)
                .unwrap_or_default();

            loop {
                interval.tick().await;

                let current = match store.durable.get(&store.config.remembered_session_key) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(error = %e, "Durable tier poll failed");
                        continue;
                    }
                };

                if current == last_seen {
                    continue;
                }

                let own_write = {
                    let last_write = store.last_durable_write.lock().unwrap();
                    *last_write == current
                };

                if own_write {
                    last_seen = current;
                    continue;
                }

                match &current {
                    Some(raw) => {
                        debug!("Durable session changed in another context");
                        store.adopt_external(raw);
                    }
                    None => {
                        debug!("Durable session removed by another context");
                        if let Err(e) = store.clear() {
                            warn!(error = %e, "Failed to clear after external removal");
                        }
                    }
                }

                last_seen = current;
            }
        });

        DurableWatchHandle { handle }
    }
}
