//! API client with the refresh interceptor.

use crate::error::{TransportError, TransportResult};
use crate::types::{
    ApiUser, AuthSession, ErrorBody, LoginRequest, LogoutRequest, ProfileUpdate,
    ProfileUpdateResponse, RefreshRequest, RefreshResponse, SignupRequest,
};
use reqwest::{Method, StatusCode};
use session_store::{SessionRecord, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Retry behavior for server errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per request (first try included).
    pub max_attempts: u32,
    /// Initial backoff delay.
    pub backoff_base: Duration,
    /// Backoff cap.
    pub backoff_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.backoff_base.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(self.backoff_max.as_millis() as u64))
    }
}

/// Per-request state carried through the interceptor.
///
/// Each in-flight request owns its context, so concurrent requests retry and
/// refresh independently of one another.
struct RequestContext {
    request_id: Uuid,
    attempt: u32,
    refreshed: bool,
}

impl RequestContext {
    fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            attempt: 0,
            refreshed: false,
        }
    }
}

/// HTTP client for the member portal API.
///
/// Bearer tokens come from the [`SessionStore`]; the store is also where
/// rotated tokens land after a refresh and the only thing the client mutates.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<SessionStore>,
    retry: RetryConfig,
}

impl ApiClient {
    /// Create a new client.
    pub fn new(base_url: impl Into<String>, store: Arc<SessionStore>) -> Self {
        Self::with_retry_config(base_url, store, RetryConfig::default())
    }

    /// Create a new client with custom retry configuration.
    pub fn with_retry_config(
        base_url: impl Into<String>,
        store: Arc<SessionStore>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            store,
            retry,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Authenticate with email and password.
    pub async fn login(&self, email: &str, password: &str) -> TransportResult<AuthSession> {
        let body = serde_json::to_value(LoginRequest { email, password })?;
        let response = self
            .send_request(Method::POST, "/auth/login", Some(&body), None, false)
            .await?;
        Ok(response.json().await?)
    }

    /// Create an account; the response carries a live session (auto-login).
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> TransportResult<AuthSession> {
        let body = serde_json::to_value(SignupRequest {
            email,
            password,
            display_name,
        })?;
        let response = self
            .send_request(Method::POST, "/auth/signup", Some(&body), None, false)
            .await?;
        Ok(response.json().await?)
    }

    /// Fetch the current user's profile.
    pub async fn profile(&self) -> TransportResult<ApiUser> {
        let token = self.current_token()?;
        let response = self
            .send_request(Method::GET, "/auth/profile", None, Some(&token), true)
            .await?;
        Ok(response.json().await?)
    }

    /// Apply a partial profile update.
    ///
    /// An email change makes the server re-issue tokens; the rotated
    /// credentials come back in the response for the caller to persist.
    pub async fn update_profile(
        &self,
        changes: &ProfileUpdate,
    ) -> TransportResult<ProfileUpdateResponse> {
        let token = self.current_token()?;
        let body = serde_json::to_value(changes)?;
        let response = self
            .send_request(Method::PUT, "/auth/profile", Some(&body), Some(&token), true)
            .await?;
        Ok(response.json().await?)
    }

    /// Revoke the stored session server-side.
    pub async fn logout(&self, revoke_all: bool) -> TransportResult<()> {
        let token = self.current_token()?;
        self.revoke_session(&token, revoke_all).await
    }

    /// Revoke a specific session server-side.
    ///
    /// Takes the token explicitly so callers can tear down local state
    /// before (or concurrently with) the revoke call.
    pub async fn revoke_session(&self, token: &str, revoke_all: bool) -> TransportResult<()> {
        let body = serde_json::to_value(LogoutRequest { revoke_all })?;
        self.send_request(Method::POST, "/auth/logout", Some(&body), Some(token), false)
            .await?;
        Ok(())
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// On success the rotated tokens are persisted (to the tiers currently
    /// holding data) and broadcast through the store. Any failure clears the
    /// session unconditionally; this is the single authoritative place
    /// session teardown occurs on auth failure.
    pub async fn refresh(&self) -> TransportResult<SessionRecord> {
        match self.try_refresh().await {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                let _ = self.store.clear();
                Err(TransportError::RefreshExhausted(e.to_string()))
            }
        }
    }

    async fn try_refresh(&self) -> TransportResult<SessionRecord> {
        let record = self.store.read()?.ok_or(TransportError::NotAuthenticated)?;
        let refresh_token = record
            .refresh_token
            .ok_or(TransportError::MissingRefreshToken)?;

        let url = self.endpoint("/auth/refresh");
        debug!(%url, "Refreshing token");

        let response = self
            .http
            .post(&url)
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let data: RefreshResponse = response.json().await?;
        let remember = self.store.remembered()?;
        // Keep the old refresh token when the server doesn't rotate it.
        let rotated_refresh = data.refresh_token.or(Some(refresh_token));

        let record = self.store.persist(
            &data.access_token,
            None,
            data.user.into(),
            remember,
            rotated_refresh,
        )?;

        info!(user_id = %record.user.user_id, "Token refreshed");
        Ok(record)
    }

    /// Send a request, applying the retry/refresh policy.
    ///
    /// 401/403 on an authenticated request triggers exactly one refresh and
    /// one retry of the original request with the new token. 5xx responses
    /// are retried with exponential backoff up to `retry.max_attempts`.
    /// Network-layer errors surface immediately and never touch the session.
    async fn send_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        bearer: Option<&str>,
        allow_refresh: bool,
    ) -> TransportResult<reqwest::Response> {
        let url = self.endpoint(path);
        let mut ctx = RequestContext::new();
        let mut token = bearer.map(str::to_string);

        loop {
            let mut request = self.http.request(method.clone(), &url);
            if let Some(token) = &token {
                request = request.header("Authorization", format!("Bearer {}", token));
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!(
                request_id = %ctx.request_id,
                attempt = ctx.attempt,
                %url,
                "Sending request"
            );

            let response = request.send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
                && allow_refresh
                && !ctx.refreshed
            {
                ctx.refreshed = true;
                info!(
                    request_id = %ctx.request_id,
                    status = %status,
                    "Auth failure, attempting token refresh"
                );
                let record = self.refresh().await?;
                token = Some(record.token);
                continue;
            }

            if status.is_server_error() && ctx.attempt + 1 < self.retry.max_attempts {
                let delay = self.retry.delay_for_attempt(ctx.attempt);
                ctx.attempt += 1;
                debug!(
                    request_id = %ctx.request_id,
                    attempt = ctx.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, backing off before retry"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(api_error(response).await);
        }
    }

    fn current_token(&self) -> TransportResult<String> {
        let record = self.store.read()?.ok_or(TransportError::NotAuthenticated)?;
        Ok(record.token)
    }
}

/// Build a structured error from a non-success response.
async fn api_error(response: reqwest::Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);
    TransportError::Api { status, message }
}
