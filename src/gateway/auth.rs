//! Gateway authentication and token lifecycle.
//!
//! Tokens are owned here exclusively and replaced, never mutated. A single
//! mutex is held across the whole refresh, so concurrent callers queue behind
//! one in-flight login and find the fresh token on wake (single-flight).

use crate::config::{AuthMode, GatewayConfig};
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::types::{Envelope, LoginAppRequest, LoginKeyRequest, TokenResponse};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Gateway tokens are valid for ~24h; refresh proactively.
const TOKEN_LIFETIME_HOURS: i64 = 24;
/// Refresh when within this buffer of expiry.
const REFRESH_BUFFER_MINUTES: i64 = 5;

/// A bearer token with its lifecycle metadata. Immutable once issued.
#[derive(Debug, Clone)]
pub struct Token {
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub mode: AuthMode,
}

impl Token {
    /// Whether this token is still usable at `now`, honoring the refresh buffer.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::minutes(REFRESH_BUFFER_MINUTES)
    }
}

/// Obtains and refreshes gateway bearer tokens.
pub struct CredentialAuthority {
    http: Client,
    config: GatewayConfig,
    cached: Mutex<Option<Token>>,
}

impl CredentialAuthority {
    /// Create a new authority from gateway configuration.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            cached: Mutex::new(None),
        })
    }

    /// Get a valid token, logging in when the cached one is stale or `force` is set.
    pub async fn get_token(&self, force: bool) -> GatewayResult<Token> {
        let mut cached = self.cached.lock().await;

        if !force {
            if let Some(token) = cached.as_ref() {
                if token.is_fresh(Utc::now()) {
                    return Ok(token.clone());
                }
            }
        }

        info!(mode = ?self.config.auth_mode, "Authenticating with gateway");
        let token = match self.config.auth_mode {
            AuthMode::LoginKey => {
                let payload = LoginKeyRequest {
                    user_name: self.config.username.clone(),
                    api_key: self.config.api_key.clone(),
                };
                self.request_token("/Auth/loginKey", &payload).await?
            }
            AuthMode::LoginApp => {
                let payload = LoginAppRequest {
                    user_name: self.config.app_username.clone(),
                    password: self.config.app_password.clone(),
                    device_id: self.config.app_device_id.clone(),
                    app_id: self.config.app_id.clone(),
                    verify_key: self.config.app_verify_key.clone(),
                };
                self.request_token("/Auth/loginApp", &payload).await?
            }
        };

        if self.config.validate_tokens {
            self.validate(&token).await?;
        }

        info!("Authentication successful - token obtained");
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Authorization header value for the current token.
    pub async fn bearer_header(&self) -> GatewayResult<String> {
        let token = self.get_token(false).await?;
        Ok(format!("Bearer {}", token.token))
    }

    /// Drop the cached token so the next call performs a fresh login.
    pub async fn invalidate(&self) {
        let mut cached = self.cached.lock().await;
        if cached.take().is_some() {
            warn!("Cached gateway token invalidated");
        }
    }

    async fn request_token<B: Serialize>(&self, endpoint: &str, payload: &B) -> GatewayResult<Token> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        debug!(%url, "Requesting gateway token");

        let response = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| GatewayError::authentication(format!("Login request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::authentication(format!("Login response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(GatewayError::authentication(format!(
                "Login failed with HTTP {}: {}",
                status.as_u16(),
                truncate(&body, 200)
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            GatewayError::authentication(format!("Failed to parse login response: {e}"))
        })?;

        match parsed.token {
            Some(token) if parsed.success() && parsed.error_code() == 0 && !token.is_empty() => {
                let acquired_at = Utc::now();
                Ok(Token {
                    token,
                    acquired_at,
                    expires_at: acquired_at + Duration::hours(TOKEN_LIFETIME_HOURS),
                    mode: self.config.auth_mode,
                })
            }
            _ => {
                let code = parsed.error_code();
                let message = parsed
                    .error_message()
                    .map(str::to_string)
                    .unwrap_or_else(|| login_error_message(code).to_string());
                Err(GatewayError::authentication(format!(
                    "Login rejected (code={code}): {message}"
                ))
                .with_code(code))
            }
        }
    }

    /// Confirm the token is accepted by the gateway's validate endpoint.
    async fn validate(&self, token: &Token) -> GatewayResult<()> {
        let url = format!(
            "{}/Auth/validate",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", token.token))
            .send()
            .await
            .map_err(|e| GatewayError::authentication(format!("Token validation failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::authentication(format!(
                "Token validation failed with HTTP {}: {}",
                status.as_u16(),
                truncate(&body, 200)
            )));
        }

        debug!("Gateway token validation succeeded");
        Ok(())
    }
}

/// Known gateway login error codes.
fn login_error_message(code: i64) -> &'static str {
    match code {
        1 => "Invalid credentials",
        2 => "Account locked or disabled",
        3 => "Invalid API key or username",
        4 => "Rate limit exceeded",
        _ => "Unknown error",
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
