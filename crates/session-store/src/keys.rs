//! Storage key constants.

/// Storage keys used by the session store.
///
/// The two tiers use distinct keys so a "remembered" session and the current
/// context's session can never be confused with each other.
pub struct StorageKeys;

impl StorageKeys {
    /// Current-context session (ephemeral tier)
    pub const SESSION: &'static str = "session";

    /// Remembered session (durable tier)
    pub const REMEMBERED_SESSION: &'static str = "remembered_session";
}
