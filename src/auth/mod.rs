//! Authentication module for the brokerage API
//!
//! Bootstraps OAuth2 credentials through an interactive authorization-code
//! login, then keeps the access token fresh with refresh-token grants.

pub mod error;
pub mod exchange;
pub mod login;
pub mod manager;
pub mod scheduler;
pub mod state;
pub mod tokens;

use std::fmt;

pub use error::{AuthError, Result};
pub use exchange::{Grant, HttpTokenExchanger, TokenExchanger, TokenPair};
pub use login::{LoginFlow, TerminalLogin};
pub use manager::{AuthManager, AuthSnapshot, RetryPolicy};
pub use scheduler::{RenewalEvent, RenewalScheduler};
pub use state::{AuthState, Clock, SystemClock, TokenPolicy};
pub use tokens::{StoreKey, StoreSnapshot, TokenRecord, TokenStore};

/// Application identity registered with the brokerage.
///
/// Read once from the credential store and never changed afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// OAuth2 client ID
    pub app_key: String,
    /// OAuth2 client secret
    pub app_secret: String,
    /// Callback URL registered for the app
    pub redirect_uri: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_key", &self.app_key)
            .field("app_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}
