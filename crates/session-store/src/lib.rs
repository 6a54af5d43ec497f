//! Session persistence for the Memberport client.
//!
//! A session lives in two storage tiers with different lifetimes:
//! - **ephemeral**: process-scoped, gone when this execution context exits
//! - **durable**: a shared file, visible to every context ("remember me")
//!
//! All mutation goes through [`SessionStore`]; no consumer writes a tier
//! directly. Every write is followed by an intra-process broadcast event, and
//! a polling watcher surfaces durable-tier writes made by other contexts.

mod keys;
mod record;
mod store;
mod tiers;
mod watcher;

pub use keys::StorageKeys;
pub use record::{SessionRecord, UserSnapshot, UserUpdate};
pub use store::{SessionEvent, SessionStore, SessionStoreConfig};
pub use tiers::{FileTier, MemoryTier, SessionTier};
pub use watcher::{DurableWatchHandle, DEFAULT_WATCH_INTERVAL};

use portal_config_and_utils::Paths;
use thiserror::Error;

/// Error type for session storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backing tier failure (filesystem, etc.)
    #[error("Storage tier error: {0}")]
    Tier(String),

    /// Record violates a write-time invariant
    #[error("Invalid session record: {0}")]
    InvalidRecord(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for session storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl SessionStore {
    /// Open the standard two-tier store for this process: an in-memory
    /// ephemeral tier plus the shared durable tier under the app base dir.
    pub fn open(paths: &Paths) -> StorageResult<Self> {
        let durable = FileTier::new(paths.session_dir())?;
        Ok(Self::new(Box::new(MemoryTier::new()), Box::new(durable)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_uses_session_dir() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let store = SessionStore::open(&paths).unwrap();
        store
            .persist_at(
                "a.b.c",
                Some(1_700_003_600),
                UserSnapshot {
                    user_id: "u-1".to_string(),
                    email: "m@example.com".to_string(),
                    display_name: None,
                },
                true,
                None,
                1_700_000_000,
            )
            .unwrap();

        // The remembered session lives as a file under <base>/session
        assert!(paths
            .session_dir()
            .join(format!("{}.json", StorageKeys::REMEMBERED_SESSION))
            .exists());
    }
}
