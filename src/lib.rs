//! Broker CLI - OAuth2 token lifecycle for the Schwab brokerage API
//!
//! [`auth::AuthManager`] is the single authority for bearer tokens: it
//! evaluates token validity, refreshes or bootstraps credentials, and
//! persists them. [`auth::RenewalScheduler`] keeps the access token fresh
//! in the background; [`api::BrokerClient`] attaches the token to requests.

pub mod api;
pub mod auth;
pub mod config;

#[cfg(test)]
mod test_support;
