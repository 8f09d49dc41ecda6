//! Token endpoint exchange
//!
//! `POST {oauth_base}/token` with HTTP Basic client authentication and a
//! form body carrying either an authorization-code or a refresh-token grant.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;

use super::error::{AuthError, Result};
use super::Credentials;

/// Request timeout applied to every exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The two grants the endpoint accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    AuthorizationCode { code: String, redirect_uri: String },
    RefreshToken { refresh_token: String },
}

impl Grant {
    pub fn kind(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }

    fn form(&self) -> Vec<(&'static str, &str)> {
        match self {
            Grant::AuthorizationCode { code, redirect_uri } => vec![
                ("grant_type", self.kind()),
                ("code", code.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
            ],
            Grant::RefreshToken { refresh_token } => vec![
                ("grant_type", self.kind()),
                ("refresh_token", refresh_token.as_str()),
            ],
        }
    }
}

/// Fresh credentials returned by a successful exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair").finish_non_exhaustive()
    }
}

/// Performs a single grant exchange. Persisting the result is the caller's job.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, credentials: &Credentials, grant: &Grant) -> Result<TokenPair>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// `base64(app_key:app_secret)` for the Basic scheme.
pub fn basic_auth_value(credentials: &Credentials) -> String {
    let raw = format!("{}:{}", credentials.app_key, credentials.app_secret);
    format!("Basic {}", STANDARD.encode(raw))
}

/// reqwest-backed exchanger for the real endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenExchanger {
    http: reqwest::Client,
    token_url: String,
}

impl HttpTokenExchanger {
    pub fn new(oauth_base: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            token_url: format!("{}/token", oauth_base.trim_end_matches('/')),
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange(&self, credentials: &Credentials, grant: &Grant) -> Result<TokenPair> {
        tracing::info!("POST {}: {} grant", self.token_url, grant.kind());

        let resp = self
            .http
            .post(&self.token_url)
            .header(AUTHORIZATION, basic_auth_value(credentials))
            .form(&grant.form())
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AuthError::ExchangeRejected {
                status: Some(status.as_u16()),
                reason: body,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::ExchangeRejected {
                status: Some(status.as_u16()),
                reason: format!("unparsable token response: {}", e),
            })?;

        let missing = |field: &str| AuthError::ExchangeRejected {
            status: Some(status.as_u16()),
            reason: format!("token response missing '{}'", field),
        };
        let access_token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| missing("access_token"))?;
        let refresh_token = parsed
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| missing("refresh_token"))?;

        if let Some(secs) = parsed.expires_in {
            tracing::debug!("Token endpoint reports expires_in={}s", secs);
        }

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }
}
