//! The consolidated session store.

use crate::{
    SessionRecord, SessionTier, StorageError, StorageKeys, StorageResult, UserSnapshot, UserUpdate,
};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Lifecycle events broadcast by the store.
///
/// These are intra-context only: a consumer in this process must subscribe
/// explicitly. Writes made by other contexts surface through the durable
/// watcher (see [`SessionStore::spawn_durable_watch`]).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A record was written; carries the new record.
    Updated(SessionRecord),
    /// The session was cleared.
    Cleared,
}

/// Configuration for the session store.
///
/// Tier keys and "remember" semantics live here so there is exactly one
/// store implementation instead of per-call-site variants.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Key for the ephemeral (current-context) tier.
    pub session_key: String,
    /// Key for the durable (remembered) tier.
    pub remembered_session_key: String,
    /// Lifetime granted to a record whose token carries no usable expiry,
    /// in seconds. The fallback is logged whenever it fires.
    pub fallback_ttl_secs: i64,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            session_key: StorageKeys::SESSION.to_string(),
            remembered_session_key: StorageKeys::REMEMBERED_SESSION.to_string(),
            fallback_ttl_secs: 3600,
            event_capacity: 16,
        }
    }
}

/// Two-tier session store.
///
/// The ephemeral tier always holds the current context's session; the
/// durable tier additionally holds it when the user opted into "remember
/// me". Reads prefer the ephemeral tier and mirror durable hits back into it
/// so subsequent reads are context-local.
pub struct SessionStore {
    pub(crate) ephemeral: Box<dyn SessionTier>,
    pub(crate) durable: Box<dyn SessionTier>,
    pub(crate) config: SessionStoreConfig,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    /// Last raw value this store wrote to (or removed from) the durable
    /// tier. The watcher uses it to skip this context's own writes, matching
    /// cross-context notification semantics.
    pub(crate) last_durable_write: Mutex<Option<String>>,
}

impl SessionStore {
    /// Create a store over the given tiers with default configuration.
    pub fn new(ephemeral: Box<dyn SessionTier>, durable: Box<dyn SessionTier>) -> Self {
        Self::with_config(ephemeral, durable, SessionStoreConfig::default())
    }

    /// Create a store with custom configuration.
    pub fn with_config(
        ephemeral: Box<dyn SessionTier>,
        durable: Box<dyn SessionTier>,
        config: SessionStoreConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            ephemeral,
            durable,
            config,
            events,
            last_durable_write: Mutex::new(None),
        }
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Persist a session record.
    ///
    /// Writes to the ephemeral tier unconditionally and to the durable tier
    /// only when `remember` is set. `expires_at` falls back to the token's
    /// `exp` claim, then to `now + fallback_ttl_secs` for undecodable
    /// tokens. Broadcasts [`SessionEvent::Updated`] after the write.
    pub fn persist(
        &self,
        token: &str,
        expires_at: Option<i64>,
        user: UserSnapshot,
        remember: bool,
        refresh_token: Option<String>,
    ) -> StorageResult<SessionRecord> {
        self.persist_at(
            token,
            expires_at,
            user,
            remember,
            refresh_token,
            chrono::Utc::now().timestamp(),
        )
    }

    /// Clock-pinned variant of [`SessionStore::persist`].
    pub fn persist_at(
        &self,
        token: &str,
        expires_at: Option<i64>,
        user: UserSnapshot,
        remember: bool,
        refresh_token: Option<String>,
        now: i64,
    ) -> StorageResult<SessionRecord> {
        if token.is_empty() {
            return Err(StorageError::InvalidRecord("empty token".to_string()));
        }

        let expires_at = expires_at
            .or_else(|| token_codec::decode(token).and_then(|p| p.exp))
            .unwrap_or_else(|| {
                warn!(
                    fallback_ttl_secs = self.config.fallback_ttl_secs,
                    "Token carries no usable expiry, applying fallback lifetime"
                );
                now + self.config.fallback_ttl_secs
            });

        let record = SessionRecord {
            token: token.to_string(),
            refresh_token,
            expires_at,
            user,
            stored_at: now,
        };

        let raw = encode_record(&record)?;
        self.ephemeral.set(&self.config.session_key, &raw)?;
        if remember {
            self.durable.set(&self.config.remembered_session_key, &raw)?;
            *self.last_durable_write.lock().unwrap() = Some(raw);
        }

        debug!(user_id = %record.user.user_id, remember, "Session persisted");
        let _ = self.events.send(SessionEvent::Updated(record.clone()));
        Ok(record)
    }

    /// Read the current session record.
    ///
    /// Prefers the ephemeral tier; on miss, falls back to the durable tier
    /// and mirrors a hit back into the ephemeral tier. A record with an
    /// empty token or an expiry at/before now is purged from both tiers
    /// (broadcasting [`SessionEvent::Cleared`]) and `None` is returned.
    pub fn read(&self) -> StorageResult<Option<SessionRecord>> {
        self.read_at(chrono::Utc::now().timestamp())
    }

    /// Clock-pinned variant of [`SessionStore::read`].
    pub fn read_at(&self, now: i64) -> StorageResult<Option<SessionRecord>> {
        if let Some(raw) = self.ephemeral.get(&self.config.session_key)? {
            return self.validate_or_purge(&raw, now);
        }

        if let Some(raw) = self.durable.get(&self.config.remembered_session_key)? {
            let record = self.validate_or_purge(&raw, now)?;
            if record.is_some() {
                // Read-through mirror keeps subsequent reads context-local.
                self.ephemeral.set(&self.config.session_key, &raw)?;
            }
            return Ok(record);
        }

        Ok(None)
    }

    /// Remove the session from both tiers.
    ///
    /// Idempotent: always broadcasts exactly one [`SessionEvent::Cleared`],
    /// whether or not a record existed.
    pub fn clear(&self) -> StorageResult<()> {
        let _ = self.ephemeral.delete(&self.config.session_key);
        let _ = self.durable.delete(&self.config.remembered_session_key);
        *self.last_durable_write.lock().unwrap() = None;

        debug!("Session cleared");
        let _ = self.events.send(SessionEvent::Cleared);
        Ok(())
    }

    /// Merge a partial user update into the stored record.
    ///
    /// Re-persists to exactly the tiers that currently hold data and
    /// broadcasts [`SessionEvent::Updated`]. Returns `None` (without
    /// touching storage) when no record is stored.
    pub fn update_user(&self, update: &UserUpdate) -> StorageResult<Option<SessionRecord>> {
        self.update_user_at(update, chrono::Utc::now().timestamp())
    }

    /// Clock-pinned variant of [`SessionStore::update_user`].
    pub fn update_user_at(
        &self,
        update: &UserUpdate,
        now: i64,
    ) -> StorageResult<Option<SessionRecord>> {
        let in_ephemeral = self.ephemeral.has(&self.config.session_key)?;
        let in_durable = self.durable.has(&self.config.remembered_session_key)?;

        let raw = if in_ephemeral {
            self.ephemeral.get(&self.config.session_key)?
        } else {
            self.durable.get(&self.config.remembered_session_key)?
        };
        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut record = match decode_record(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Stored session is corrupt, clearing");
                self.clear()?;
                return Ok(None);
            }
        };

        record.user.apply(update);
        record.stored_at = now;

        let raw = encode_record(&record)?;
        if in_ephemeral {
            self.ephemeral.set(&self.config.session_key, &raw)?;
        }
        if in_durable {
            self.durable.set(&self.config.remembered_session_key, &raw)?;
            *self.last_durable_write.lock().unwrap() = Some(raw);
        }

        debug!(user_id = %record.user.user_id, "Session user snapshot updated");
        let _ = self.events.send(SessionEvent::Updated(record.clone()));
        Ok(Some(record))
    }

    /// Whether the durable tier currently holds a session ("remember me").
    pub fn remembered(&self) -> StorageResult<bool> {
        self.durable.has(&self.config.remembered_session_key)
    }

    /// Validate a raw stored value; purge both tiers on any rejection.
    fn validate_or_purge(&self, raw: &str, now: i64) -> StorageResult<Option<SessionRecord>> {
        let record = match decode_record(raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Stored session is corrupt, clearing");
                self.clear()?;
                return Ok(None);
            }
        };

        if record.token.is_empty() {
            warn!("Stored session has an empty token, clearing");
            self.clear()?;
            return Ok(None);
        }

        if record.is_expired_at(now) {
            debug!(expires_at = record.expires_at, "Stored session expired, clearing");
            self.clear()?;
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Adopt a durable-tier value written by another context: mirror it into
    /// the ephemeral tier and broadcast the update locally.
    pub(crate) fn adopt_external(&self, raw: &str) {
        match decode_record(raw) {
            Ok(record) => {
                if let Err(e) = self.ephemeral.set(&self.config.session_key, raw) {
                    warn!(error = %e, "Failed to mirror external session write");
                }
                debug!(user_id = %record.user.user_id, "Adopted session written by another context");
                let _ = self.events.send(SessionEvent::Updated(record));
            }
            Err(e) => {
                warn!(error = %e, "Ignoring corrupt external session write");
            }
        }
    }
}

fn encode_record(record: &SessionRecord) -> StorageResult<String> {
    serde_json::to_string(record).map_err(|e| StorageError::Encoding(e.to_string()))
}

fn decode_record(raw: &str) -> StorageResult<SessionRecord> {
    serde_json::from_str(raw).map_err(|e| StorageError::Encoding(e.to_string()))
}
