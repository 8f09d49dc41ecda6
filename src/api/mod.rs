//! API access for the brokerage trader and market data products

pub mod client;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub use client::BrokerClient;

use crate::config::Settings;

/// The two individual-trader API products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ApiCategory {
    /// Accounts and trading
    Trader,
    /// Quotes, chains, price history
    #[value(name = "marketdata")]
    MarketData,
}

impl fmt::Display for ApiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApiCategory::Trader => "trader",
            ApiCategory::MarketData => "marketdata",
        })
    }
}

/// Where a response for `endpoint` is cached: `{cache_dir}{endpoint}.json`.
pub fn cache_path(cache_dir: &Path, endpoint: &str) -> PathBuf {
    cache_dir.join(format!("{}.json", endpoint.trim_start_matches('/')))
}

/// GET an endpoint as JSON, honouring the `use_cache` and
/// `write_on_response` settings.
pub async fn api_request(
    client: &BrokerClient,
    settings: &Settings,
    category: ApiCategory,
    endpoint: &str,
    params: &[(String, String)],
) -> Result<serde_json::Value> {
    let cached = cache_path(&settings.cache_dir, endpoint);

    if settings.use_cache {
        tracing::debug!("Reading {} from {}", endpoint, cached.display());
        let content = fs::read_to_string(&cached)
            .with_context(|| format!("No cached response at {}", cached.display()))?;
        return serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cached {}", cached.display()));
    }

    let value = client.get_json(category, endpoint, params).await?;

    if settings.write_on_response {
        if let Some(parent) = cached.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&cached, serde_json::to_string_pretty(&value)?)
            .with_context(|| format!("Failed to write {}", cached.display()))?;
        tracing::info!("Saved response to {}", cached.display());
    }

    Ok(value)
}
