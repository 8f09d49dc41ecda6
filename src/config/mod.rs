//! Configuration and credential storage

pub mod store;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::RetryPolicy;

pub use store::EnvFileStore;

const DEFAULT_OAUTH_BASE: &str = "https://api.schwabapi.com/v1/oauth";
const DEFAULT_TRADER_BASE: &str = "https://api.schwabapi.com/trader/v1";
const DEFAULT_MARKETDATA_BASE: &str = "https://api.schwabapi.com/marketdata/v1";

/// Application settings. Secrets never live here; see [`EnvFileStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Credential store (`APP_KEY=...` lines)
    pub env_path: PathBuf,
    pub oauth_base: String,
    pub trader_base: String,
    pub marketdata_base: String,
    pub request_timeout_secs: u64,
    /// Start the renewal task at process start
    pub auto_renew: bool,
    pub refresh_attempts: u32,
    pub retry_backoff_secs: u64,
    /// Serve API calls from `cache_dir` instead of the network
    pub use_cache: bool,
    /// Save every API response under `cache_dir`
    pub write_on_response: bool,
    pub cache_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env_path: PathBuf::from(".env"),
            oauth_base: DEFAULT_OAUTH_BASE.to_string(),
            trader_base: DEFAULT_TRADER_BASE.to_string(),
            marketdata_base: DEFAULT_MARKETDATA_BASE.to_string(),
            request_timeout_secs: 60,
            auto_renew: false,
            refresh_attempts: 3,
            retry_backoff_secs: 2,
            use_cache: false,
            write_on_response: false,
            cache_dir: PathBuf::from("data"),
        }
    }
}

impl Settings {
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "broker-cli", "broker-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load settings from the platform config dir, defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject base URLs that do not parse
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("oauth_base", &self.oauth_base),
            ("trader_base", &self.trader_base),
            ("marketdata_base", &self.marketdata_base),
        ] {
            Url::parse(value).with_context(|| format!("Invalid {}: {}", name, value))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.refresh_attempts,
            initial_backoff: Duration::from_secs(self.retry_backoff_secs),
            ..RetryPolicy::default()
        }
    }

    /// OAuth base without a trailing slash
    pub fn oauth_base(&self) -> &str {
        self.oauth_base.trim_end_matches('/')
    }
}
