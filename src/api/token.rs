//! Token endpoint client for the identity provider.
//!
//! Implements the three supported OAuth2 grant exchanges (password,
//! refresh_token, client_credentials) plus refresh token revocation, all as
//! form-encoded posts against the realm's openid-connect endpoints.
//!
//! The client is side-effect-free beyond the network call: handing a
//! successful result to the token store is the caller's job.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::auth::store::TokenPair;
use crate::config::Config;

use super::AuthError;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Grant exchanges against the provider's token endpoint.
///
/// A trait seam so the session manager can be driven by a mock in tests.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Password grant: interactive login.
    async fn exchange_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenPair, AuthError>;

    /// Refresh grant: replace the current pair before it expires.
    async fn exchange_refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError>;

    /// Client-credentials grant: service-level access token, no refresh token.
    async fn exchange_client_credentials(&self) -> Result<String, AuthError>;

    /// Best-effort revocation of a refresh token at the provider.
    async fn revoke(&self, refresh_token: &str) -> Result<(), AuthError>;
}

/// Token endpoint client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct TokenClient {
    client: reqwest::Client,
    token_url: String,
    logout_url: String,
    client_id: String,
    client_secret: String,
}

impl TokenClient {
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            token_url: config.token_url(),
            logout_url: config.logout_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    /// Shared HTTP handle for sibling clients; cloning a reqwest::Client
    /// shares its connection pool.
    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// POST a form to the token endpoint, returning status and raw body.
    async fn post_token_form(
        &self,
        form: &[(&str, &str)],
    ) -> Result<(reqwest::StatusCode, String), AuthError> {
        let response = self.client.post(&self.token_url).form(form).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    /// Extract the provider's error description from a failure body, falling
    /// back to `fallback` when none is present.
    fn error_description(body: &str, fallback: &str) -> String {
        let parsed: ErrorResponse = serde_json::from_str(body).unwrap_or_default();
        parsed
            .error_description
            .or(parsed.error)
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Parse a success body into a full token pair. Both tokens must be
    /// present; the pair replaces atomically downstream.
    fn parse_token_pair(body: &str, now: DateTime<Utc>) -> Result<TokenPair, AuthError> {
        let parsed: TokenResponse = serde_json::from_str(body).map_err(|e| {
            AuthError::InvalidResponse(format!("unparseable token response: {}", e))
        })?;
        let refresh_token = parsed.refresh_token.ok_or_else(|| {
            AuthError::InvalidResponse("token response missing refresh_token".to_string())
        })?;
        let expires_in = parsed.expires_in.unwrap_or(0);
        Ok(TokenPair {
            access_token: parsed.access_token,
            refresh_token,
            expires_at: now + Duration::seconds(expires_in),
        })
    }

    /// Parse a success body into a bare service access token.
    fn parse_access_token(body: &str) -> Result<String, AuthError> {
        let parsed: TokenResponse = serde_json::from_str(body).map_err(|e| {
            AuthError::InvalidResponse(format!("unparseable token response: {}", e))
        })?;
        Ok(parsed.access_token)
    }
}

#[async_trait]
impl Exchange for TokenClient {
    async fn exchange_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenPair, AuthError> {
        let form = [
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("username", username),
            ("password", password),
        ];
        let (status, body) = self.post_token_form(&form).await?;
        if !status.is_success() {
            return Err(AuthError::InvalidCredentials(Self::error_description(
                &body,
                "Login failed",
            )));
        }
        debug!(username, "Password grant succeeded");
        Self::parse_token_pair(&body, Utc::now())
    }

    async fn exchange_refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        let (status, body) = self.post_token_form(&form).await?;
        if !status.is_success() {
            return Err(AuthError::RefreshFailed(Self::error_description(
                &body,
                "Token refresh failed",
            )));
        }
        debug!("Refresh grant succeeded");
        Self::parse_token_pair(&body, Utc::now())
    }

    async fn exchange_client_credentials(&self) -> Result<String, AuthError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let (status, body) = self.post_token_form(&form).await?;
        if !status.is_success() {
            return Err(AuthError::service_failure(status, &body));
        }
        debug!("Client-credentials grant succeeded");
        Self::parse_access_token(&body)
    }

    async fn revoke(&self, refresh_token: &str) -> Result<(), AuthError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        let response = self
            .client
            .post(&self.logout_url)
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::service_failure(status, &body));
        }
        Ok(())
    }
}
