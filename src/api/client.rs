//! Authenticated HTTP client for the brokerage APIs
//!
//! Wraps reqwest::Client and asks the [`AuthManager`] for a bearer token on
//! every request, so renewal stays transparent to call sites.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use super::ApiCategory;
use crate::auth::AuthManager;
use crate::config::Settings;

/// Client for the trader and market data APIs.
pub struct BrokerClient {
    http: reqwest::Client,
    auth: Arc<AuthManager>,
    trader_base: String,
    marketdata_base: String,
}

impl BrokerClient {
    pub fn new(auth: Arc<AuthManager>, settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            auth,
            trader_base: settings.trader_base.trim_end_matches('/').to_string(),
            marketdata_base: settings.marketdata_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self, category: ApiCategory) -> &str {
        match category {
            ApiCategory::Trader => &self.trader_base,
            ApiCategory::MarketData => &self.marketdata_base,
        }
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    /// GET `{base}{endpoint}` with `Authorization: Bearer <token>`.
    pub async fn get(
        &self,
        category: ApiCategory,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<reqwest::Response> {
        let token = self.auth.current_token().await?;
        let url = format!("{}{}", self.base_url(category), endpoint);
        tracing::debug!("{} GET {}", category, url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .query(params)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        check_response(resp, &url).await
    }

    /// GET and decode the body as JSON.
    pub async fn get_json(
        &self,
        category: ApiCategory,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<serde_json::Value> {
        let resp = self.get(category, endpoint, params).await?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse {} response", endpoint))
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Token may be invalid -- run 'broker-cli login --force'.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}
