//! The persisted session record.

use serde::{Deserialize, Serialize};

/// Denormalized user snapshot carried alongside the tokens.
///
/// This is a cache of the server-side profile so protected views can render
/// immediately after hydrate; it is replaced by a fresh fetch when one lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    /// User ID.
    pub user_id: String,
    /// Account email.
    pub email: String,
    /// Display name, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Partial update merged into a stored [`UserSnapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    /// New email, if changed.
    pub email: Option<String>,
    /// New display name, if changed.
    pub display_name: Option<String>,
}

impl UserSnapshot {
    /// Merge a partial update into this snapshot.
    pub fn apply(&mut self, update: &UserUpdate) {
        if let Some(email) = &update.email {
            self.email = email.clone();
        }
        if let Some(display_name) = &update.display_name {
            self.display_name = Some(display_name.clone());
        }
    }
}

/// The unit of session persistence.
///
/// Invariants at write time: `token` is never empty and `expires_at` is
/// always present (derived from the token claims, or defaulted by the store
/// when the token is undecodable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Compact signed access token.
    pub token: String,
    /// Refresh token, when the server issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token expiry (Unix seconds).
    pub expires_at: i64,
    /// Cached user snapshot.
    pub user: UserSnapshot,
    /// Write time (Unix seconds).
    pub stored_at: i64,
}

impl SessionRecord {
    /// Whether the record is expired relative to `now` (Unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}
