//! Token validity evaluation
//!
//! Pure functions over issue timestamps. Nothing here reads the store or
//! the network; the current time is always passed in.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::tokens::TokenRecord;

/// Access tokens live 30 minutes.
pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);
/// Refresh tokens live 7 days.
pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Subtracted from both lifetimes so renewal lands before the server rejects.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Source of "now" in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// `true` iff `now - issued_at < ttl - margin`.
///
/// A token issued in the future (clock skew) counts as age zero.
pub fn is_valid(now: u64, issued_at: u64, ttl: Duration, margin: Duration) -> bool {
    let age = now.saturating_sub(issued_at);
    let window = ttl.saturating_sub(margin).as_secs();
    age < window
}

/// Lifetimes applied to the two token records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub safety_margin: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            access_ttl: ACCESS_TOKEN_TTL,
            refresh_ttl: REFRESH_TOKEN_TTL,
            safety_margin: SAFETY_MARGIN,
        }
    }
}

impl TokenPolicy {
    pub fn access_valid(&self, now: u64, access: &TokenRecord) -> bool {
        access.is_present() && is_valid(now, access.issued_at, self.access_ttl, self.safety_margin)
    }

    pub fn refresh_valid(&self, now: u64, refresh: &TokenRecord) -> bool {
        refresh.is_present()
            && is_valid(now, refresh.issued_at, self.refresh_ttl, self.safety_margin)
    }

    /// How long the scheduler sleeps between renewals.
    pub fn renewal_interval(&self) -> Duration {
        self.access_ttl.saturating_sub(self.safety_margin)
    }

    /// Compose the two validity checks into an [`AuthState`].
    pub fn evaluate(&self, now: u64, access: &TokenRecord, refresh: &TokenRecord) -> AuthState {
        if !access.is_present() && !refresh.is_present() {
            AuthState::NoCredentials
        } else if self.access_valid(now, access) {
            AuthState::AccessValid
        } else if self.refresh_valid(now, refresh) {
            AuthState::AccessExpiredRefreshValid
        } else {
            AuthState::BothExpired
        }
    }
}

/// Derived authentication state. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NoCredentials,
    AccessValid,
    AccessExpiredRefreshValid,
    BothExpired,
}

impl AuthState {
    /// Whether reaching `AccessValid` from here needs an operator.
    pub fn needs_interactive_login(self) -> bool {
        matches!(self, AuthState::NoCredentials | AuthState::BothExpired)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthState::NoCredentials => "no credentials",
            AuthState::AccessValid => "access token valid",
            AuthState::AccessExpiredRefreshValid => "access token expired, refresh token valid",
            AuthState::BothExpired => "access and refresh tokens expired",
        };
        f.write_str(s)
    }
}
