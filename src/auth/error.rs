//! Error taxonomy for the token lifecycle

use thiserror::Error;

/// Failures surfaced by the credential store, the login flow, the token
/// endpoint, and the [`AuthManager`](super::AuthManager) facade.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Required credential fields are missing or the store is unreadable.
    #[error("configuration error: {0}")]
    Config(String),

    /// The pasted redirect URL does not carry `code=...%40`.
    #[error("redirect URL is missing the authorization code markers (`code=` ... `%40`)")]
    MalformedRedirect,

    /// The token endpoint answered, but not with a usable token pair.
    #[error("token exchange rejected{}: {reason}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    ExchangeRejected { status: Option<u16>, reason: String },

    /// Transport failure talking to the token endpoint.
    #[error("network error during token exchange: {0}")]
    Network(#[from] reqwest::Error),

    /// The credential store could not be written.
    #[error("failed to persist credentials: {0}")]
    Persistence(#[source] std::io::Error),

    /// Renewal needs an operator and the caller cannot prompt one.
    #[error("interactive login required: refresh token is missing or expired")]
    InteractiveLoginRequired,

    /// The operator prompt ended without producing a code.
    #[error("interactive login aborted: {0}")]
    LoginAborted(String),
}

impl AuthError {
    /// Transient failure: the same request may succeed if sent again.
    ///
    /// Rejected exchanges are not included; the manager already retries
    /// those before escalating to an interactive login.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
