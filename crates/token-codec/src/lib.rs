//! Access token decoding and expiry inspection.
//!
//! Tokens are compact signed credentials: three dot-separated segments, the
//! middle one URL-safe base64-encoded JSON carrying the identity claims. The
//! codec never verifies signatures (that is the server's job); it only reads
//! the claims the client needs for display and expiry scheduling.
//!
//! Every function here fails softly. A malformed token yields `None` or the
//! conservative boolean, never an error or a panic, so callers don't need
//! exception handling for routine "no usable token" conditions.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Safety margin applied to expiry checks, in seconds.
///
/// Absorbs clock skew between the client and the server so a token is
/// treated as expired slightly before the server would reject it.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 60;

/// Lookahead window for proactive refresh decisions, in seconds.
pub const DEFAULT_EXPIRING_SOON_WINDOW_SECS: i64 = 300;

/// Claims embedded in an access token.
///
/// Untrusted until the server has validated the token; the client uses them
/// for optimistic display and local expiry scheduling only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    /// Subject user ID.
    pub user_id: String,
    /// Account email at issue time.
    pub email: String,
    /// Display name, if the account has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Role claim (e.g. "customer").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Expiry (Unix seconds). A payload without `exp` cannot be used to
    /// compute validity; callers must opt in explicitly to treat it as
    /// non-expiring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued-at (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Audience claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Issuer claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Decode the claims segment of a token.
///
/// Returns `None` on wrong segment count, invalid base64, or invalid JSON.
/// Both unpadded (as issued) and padded base64 are accepted.
pub fn decode(token: &str) -> Option<TokenPayload> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(segments[1])
        .or_else(|_| URL_SAFE.decode(segments[1]))
        .ok()?;

    serde_json::from_slice(&bytes).ok()
}

/// Check whether a token is expired relative to `now` (Unix seconds).
///
/// Returns `None` when expiry cannot be determined (undecodable payload or
/// missing `exp`), `Some(true)` when `exp <= now + buffer`, else
/// `Some(false)`.
pub fn is_expired_at(token: &str, buffer_secs: i64, now: i64) -> Option<bool> {
    let exp = decode(token)?.exp?;
    Some(exp <= now + buffer_secs)
}

/// Check whether a token is expired against the current wall clock.
pub fn is_expired(token: &str, buffer_secs: i64) -> Option<bool> {
    is_expired_at(token, buffer_secs, chrono::Utc::now().timestamp())
}

/// Check whether a token will expire within `window_secs` of `now`.
///
/// Conservative: a token whose expiry cannot be determined counts as
/// expiring soon, so callers refresh rather than trust it.
pub fn will_expire_soon_at(token: &str, window_secs: i64, now: i64) -> bool {
    match is_expired_at(token, window_secs, now) {
        Some(expiring) => expiring,
        None => true,
    }
}

/// Check whether a token will expire soon against the current wall clock.
pub fn will_expire_soon(token: &str, window_secs: i64) -> bool {
    will_expire_soon_at(token, window_secs, chrono::Utc::now().timestamp())
}

/// Seconds until the token's expiry relative to `now`, negative if already
/// past. `None` when expiry cannot be determined.
pub fn time_remaining_at(token: &str, now: i64) -> Option<i64> {
    let exp = decode(token)?.exp?;
    Some(exp - now)
}

/// Seconds until the token's expiry against the current wall clock.
pub fn time_remaining(token: &str) -> Option<i64> {
    time_remaining_at(token, chrono::Utc::now().timestamp())
}
