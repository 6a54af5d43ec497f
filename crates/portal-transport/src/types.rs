//! Wire types for the auth endpoints.
//!
//! The API speaks camelCase JSON, except the refresh endpoint whose
//! request/response bodies use snake_case keys.

use serde::{Deserialize, Serialize};
use session_store::UserSnapshot;

/// User object as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUser {
    pub user_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl From<ApiUser> for UserSnapshot {
    fn from(user: ApiUser) -> Self {
        UserSnapshot {
            user_id: user.user_id,
            email: user.email,
            display_name: user.display_name,
        }
    }
}

/// Response shape of `POST /auth/login` and `POST /auth/signup`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds; absent when the server leaves expiry to the token claims.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: ApiUser,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignupRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: ApiUser,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LogoutRequest {
    pub revoke_all: bool,
}

/// Partial profile change sent to the profile-update endpoint.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Response of the profile-update endpoint.
///
/// An email change re-issues the tokens; the rotated credentials ride along
/// with the updated user object.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateResponse {
    pub user: ApiUser,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub email_changed: bool,
}

/// Error body shape used by the API: `{"error": "..."}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_session_deserializes_camel_case() {
        let json = r#"{
            "accessToken": "a.b.c",
            "refreshToken": "r.t",
            "expiresAt": 1700043200,
            "user": {"userId": "u-1", "email": "m@example.com", "displayName": "Jane"}
        }"#;

        let session: AuthSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.access_token, "a.b.c");
        assert_eq!(session.refresh_token.as_deref(), Some("r.t"));
        assert_eq!(session.expires_at, Some(1_700_043_200));
        assert_eq!(session.user.user_id, "u-1");
    }

    #[test]
    fn test_auth_session_optional_fields_absent() {
        let json = r#"{
            "accessToken": "a.b.c",
            "user": {"userId": "u-1", "email": "m@example.com"}
        }"#;

        let session: AuthSession = serde_json::from_str(json).unwrap();
        assert!(session.refresh_token.is_none());
        assert!(session.expires_at.is_none());
        assert!(session.user.display_name.is_none());
    }

    #[test]
    fn test_refresh_response_snake_case_envelope() {
        let json = r#"{
            "access_token": "new.token",
            "user": {"userId": "u-1", "email": "m@example.com"}
        }"#;

        let response: RefreshResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "new.token");
        assert!(response.refresh_token.is_none());
    }

    #[test]
    fn test_signup_request_omits_absent_display_name() {
        let request = SignupRequest {
            email: "m@example.com",
            password: "secret",
            display_name: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("displayName"));
    }

    #[test]
    fn test_profile_update_response_defaults() {
        let json = r#"{"user": {"userId": "u-1", "email": "m@example.com"}}"#;
        let response: ProfileUpdateResponse = serde_json::from_str(json).unwrap();
        assert!(response.token.is_none());
        assert!(!response.email_changed);
    }

    #[test]
    fn test_api_user_to_snapshot() {
        let user = ApiUser {
            user_id: "u-1".to_string(),
            email: "m@example.com".to_string(),
            display_name: Some("Jane".to_string()),
        };
        let snapshot: UserSnapshot = user.into();
        assert_eq!(snapshot.user_id, "u-1");
        assert_eq!(snapshot.display_name.as_deref(), Some("Jane"));
    }
}
