//! Token records and the credential store contract

use std::collections::HashMap;

use super::error::{AuthError, Result};
use super::Credentials;

/// Keys of the flat credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    AppKey,
    AppSecret,
    RedirectUri,
    AccessToken,
    AccessTokenTime,
    RefreshToken,
    RefreshTokenTime,
}

impl StoreKey {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKey::AppKey => "APP_KEY",
            StoreKey::AppSecret => "APP_SECRET",
            StoreKey::RedirectUri => "REDIRECT_URI",
            StoreKey::AccessToken => "ACCESS_TOKEN",
            StoreKey::AccessTokenTime => "ACCESS_TOKEN_TIME",
            StoreKey::RefreshToken => "REFRESH_TOKEN",
            StoreKey::RefreshTokenTime => "REFRESH_TOKEN_TIME",
        }
    }
}

/// A token value and the Unix second it was issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRecord {
    pub value: Option<String>,
    pub issued_at: u64,
}

impl TokenRecord {
    pub fn new(value: impl Into<String>, issued_at: u64) -> Self {
        Self {
            value: Some(value.into()),
            issued_at,
        }
    }

    /// A record with a timestamp but no token value.
    pub fn absent(issued_at: u64) -> Self {
        Self {
            value: None,
            issued_at,
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.as_deref().is_some_and(|v| !v.is_empty())
    }
}

/// Parse a stored timestamp. Fractional seconds are truncated; garbage
/// reads as 0, i.e. long expired.
pub fn parse_timestamp(raw: &str) -> u64 {
    let raw = raw.trim();
    raw.parse::<u64>()
        .ok()
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        })
        .unwrap_or(0)
}

/// Everything the store holds, as read at startup.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub credentials: Credentials,
    pub access: TokenRecord,
    pub refresh: TokenRecord,
}

impl StoreSnapshot {
    /// Build a snapshot from raw key/value pairs.
    ///
    /// Fails with [`AuthError::Config`] naming every missing credential key.
    pub fn from_entries(entries: &HashMap<String, String>) -> Result<Self> {
        let get = |key: StoreKey| {
            entries
                .get(key.as_str())
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let missing: Vec<&str> = [StoreKey::AppKey, StoreKey::AppSecret, StoreKey::RedirectUri]
            .into_iter()
            .filter(|k| get(*k).is_none())
            .map(StoreKey::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(AuthError::Config(format!(
                "missing required credential fields: {}",
                missing.join(", ")
            )));
        }

        let credentials = Credentials {
            app_key: get(StoreKey::AppKey).unwrap_or_default(),
            app_secret: get(StoreKey::AppSecret).unwrap_or_default(),
            redirect_uri: get(StoreKey::RedirectUri).unwrap_or_default(),
        };

        let record = |value: StoreKey, time: StoreKey| TokenRecord {
            value: get(value),
            issued_at: get(time).as_deref().map(parse_timestamp).unwrap_or(0),
        };

        Ok(Self {
            credentials,
            access: record(StoreKey::AccessToken, StoreKey::AccessTokenTime),
            refresh: record(StoreKey::RefreshToken, StoreKey::RefreshTokenTime),
        })
    }
}

/// Durable key/value persistence for credentials and token material.
///
/// Each `update` is independent and durable on return. There is no
/// multi-field transaction in this contract: a crash between two updates
/// can leave a token paired with the previous token's timestamp.
pub trait TokenStore: Send {
    fn load(&self) -> Result<StoreSnapshot>;

    fn update(&mut self, key: StoreKey, value: &str) -> Result<()>;

    /// Write several fields. Backends that can do so atomically override this.
    fn update_all(&mut self, entries: &[(StoreKey, String)]) -> Result<()> {
        for (key, value) in entries {
            self.update(*key, value)?;
        }
        Ok(())
    }
}
