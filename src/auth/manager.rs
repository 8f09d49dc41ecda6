//! Token lifecycle facade
//!
//! [`AuthManager`] is the one place that decides whether the stored access
//! token is usable, and the one place that renews it. Every renewal runs
//! under the session lock, so concurrent callers that observe a stale token
//! queue behind a single exchange and then read its result.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use super::error::{AuthError, Result};
use super::exchange::{Grant, TokenExchanger, TokenPair};
use super::login::{authorization_url, LoginFlow};
use super::state::{AuthState, Clock, SystemClock, TokenPolicy};
use super::tokens::{StoreKey, TokenRecord, TokenStore};
use super::Credentials;

/// Bounded retry with exponential backoff.
///
/// Applied by the manager to rejected refresh grants and by the
/// [`RenewalScheduler`](super::RenewalScheduler) to network failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Caller can wait on an operator.
    Interactive,
    /// Caller must never block on stdin.
    Background,
}

struct Session {
    access: TokenRecord,
    refresh: TokenRecord,
    store: Box<dyn TokenStore>,
}

/// Point-in-time view for status output. Carries no secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub state: AuthState,
    pub now: u64,
    pub access_issued_at: Option<u64>,
    pub refresh_issued_at: Option<u64>,
}

/// The single authority for bearer tokens.
pub struct AuthManager {
    credentials: Credentials,
    oauth_base: String,
    exchanger: Arc<dyn TokenExchanger>,
    login: Option<Arc<dyn LoginFlow>>,
    clock: Arc<dyn Clock>,
    policy: TokenPolicy,
    retry: RetryPolicy,
    session: Mutex<Session>,
    logins: watch::Sender<u64>,
}

impl AuthManager {
    /// Load credentials and token records from `store`.
    ///
    /// No network traffic happens here; a store holding two valid tokens
    /// yields `AccessValid` immediately.
    pub fn new(
        store: Box<dyn TokenStore>,
        oauth_base: impl Into<String>,
        exchanger: Arc<dyn TokenExchanger>,
    ) -> Result<Self> {
        let snapshot = store.load()?;
        tracing::debug!("Loaded credentials for client {}", snapshot.credentials.app_key);
        let (logins, _) = watch::channel(0);

        Ok(Self {
            credentials: snapshot.credentials,
            oauth_base: oauth_base.into(),
            exchanger,
            login: None,
            clock: Arc::new(SystemClock),
            policy: TokenPolicy::default(),
            retry: RetryPolicy::default(),
            session: Mutex::new(Session {
                access: snapshot.access,
                refresh: snapshot.refresh,
                store,
            }),
            logins,
        })
    }

    /// Allow foreground calls to fall back to operator login.
    pub fn with_login_flow(mut self, login: Arc<dyn LoginFlow>) -> Self {
        self.login = Some(login);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn token_policy(&self) -> TokenPolicy {
        self.policy
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Receiver bumped after every successful interactive login.
    pub fn subscribe_logins(&self) -> watch::Receiver<u64> {
        self.logins.subscribe()
    }

    pub async fn state(&self) -> AuthState {
        let session = self.session.lock().await;
        self.policy
            .evaluate(self.clock.now(), &session.access, &session.refresh)
    }

    pub async fn snapshot(&self) -> AuthSnapshot {
        let session = self.session.lock().await;
        let now = self.clock.now();
        AuthSnapshot {
            state: self.policy.evaluate(now, &session.access, &session.refresh),
            now,
            access_issued_at: session.access.is_present().then_some(session.access.issued_at),
            refresh_issued_at: session
                .refresh
                .is_present()
                .then_some(session.refresh.issued_at),
        }
    }

    /// A currently valid access token, renewing first if needed.
    pub async fn current_token(&self) -> Result<String> {
        self.renew(Mode::Interactive).await
    }

    /// Bring the session to `AccessValid`, prompting the operator if the
    /// refresh token is gone.
    pub async fn ensure_authenticated(&self) -> Result<()> {
        self.renew(Mode::Interactive).await.map(|_| ())
    }

    /// Like [`ensure_authenticated`](Self::ensure_authenticated), but fails
    /// with [`AuthError::InteractiveLoginRequired`] instead of prompting.
    pub async fn ensure_authenticated_background(&self) -> Result<()> {
        self.renew(Mode::Background).await.map(|_| ())
    }

    /// Interactive login. With `force`, skips the validity check.
    ///
    /// A forced login waits on the operator without holding the session
    /// lock, so callers keep reading the current token until the new pair
    /// is committed.
    pub async fn login(&self, force: bool) -> Result<()> {
        if !force {
            return self.ensure_authenticated().await;
        }
        let code = self.authorization_code().await?;
        let mut session = self.session.lock().await;
        self.redeem_code(&mut session, code).await.map(|_| ())
    }

    /// Authorization URL the operator must visit to log in.
    pub fn authorization_url(&self) -> String {
        authorization_url(&self.oauth_base, &self.credentials)
    }

    async fn renew(&self, mode: Mode) -> Result<String> {
        let mut session = self.session.lock().await;
        let state = self
            .policy
            .evaluate(self.clock.now(), &session.access, &session.refresh);

        match state {
            AuthState::AccessValid => {
                if let Some(token) = session.access.value.clone() {
                    tracing::debug!("Access token is already valid");
                    return Ok(token);
                }
            }
            AuthState::AccessExpiredRefreshValid => {
                match self.refresh_with_retries(&mut session).await {
                    Ok(token) => return Ok(token),
                    Err(e @ AuthError::ExchangeRejected { .. }) => {
                        tracing::warn!("Refresh token no longer accepted: {}", e);
                    }
                    Err(e) => return Err(e),
                }
            }
            AuthState::NoCredentials | AuthState::BothExpired => {}
        }

        match mode {
            Mode::Interactive => self.interactive_login(&mut session).await,
            Mode::Background => {
                tracing::error!("Token renewal needs an interactive login ({})", state);
                Err(AuthError::InteractiveLoginRequired)
            }
        }
    }

    async fn refresh_with_retries(&self, session: &mut Session) -> Result<String> {
        let refresh_token = session
            .refresh
            .value
            .clone()
            .ok_or(AuthError::InteractiveLoginRequired)?;
        let grant = Grant::RefreshToken { refresh_token };
        let attempts = self.retry.attempts();

        let mut attempt = 1;
        loop {
            tracing::info!("Updating access token (attempt {}/{})", attempt, attempts);
            match self.exchanger.exchange(&self.credentials, &grant).await {
                Ok(pair) => return Ok(self.commit(session, &grant, pair)),
                Err(e @ AuthError::ExchangeRejected { .. }) if attempt < attempts => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!("Refresh rejected: {}; retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn interactive_login(&self, session: &mut Session) -> Result<String> {
        let code = self.authorization_code().await?;
        self.redeem_code(session, code).await
    }

    async fn authorization_code(&self) -> Result<String> {
        let login = self.login.clone().ok_or_else(|| {
            tracing::error!("Interactive login needed but no login flow is configured");
            AuthError::InteractiveLoginRequired
        })?;

        let url = self.authorization_url();
        tracing::info!("Initializing access token via interactive login");
        tokio::task::spawn_blocking(move || login.authorization_code(&url))
            .await
            .map_err(|e| AuthError::LoginAborted(e.to_string()))?
    }

    async fn redeem_code(&self, session: &mut Session, code: String) -> Result<String> {
        let grant = Grant::AuthorizationCode {
            code,
            redirect_uri: self.credentials.redirect_uri.clone(),
        };
        let pair = self.exchanger.exchange(&self.credentials, &grant).await?;
        let token = self.commit(session, &grant, pair);
        self.logins.send_modify(|n| *n += 1);
        Ok(token)
    }

    /// Install a fresh pair in memory, then write it through to the store.
    ///
    /// A refresh grant restamps `REFRESH_TOKEN_TIME` only when the server
    /// rotated the refresh token; see "Refresh-token timestamp" in
    /// DESIGN.md.
    ///
    /// The in-memory copy is authoritative for this process even if the
    /// write fails; a restart before the next successful write loses it.
    fn commit(&self, session: &mut Session, grant: &Grant, pair: TokenPair) -> String {
        let now = self.clock.now();
        let rotated = match grant {
            Grant::AuthorizationCode { .. } => true,
            Grant::RefreshToken { refresh_token } => *refresh_token != pair.refresh_token,
        };

        let mut entries = vec![
            (StoreKey::AccessToken, pair.access_token.clone()),
            (StoreKey::AccessTokenTime, now.to_string()),
        ];
        session.access = TokenRecord::new(pair.access_token.clone(), now);
        if rotated {
            entries.push((StoreKey::RefreshToken, pair.refresh_token.clone()));
            entries.push((StoreKey::RefreshTokenTime, now.to_string()));
            session.refresh = TokenRecord::new(pair.refresh_token, now);
        }

        match session.store.update_all(&entries) {
            Ok(()) => {
                let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
                tracing::info!("Updated {}", keys.join(", "));
            }
            Err(e) => {
                tracing::error!(
                    "Failed to persist renewed tokens, holding them in memory only: {}",
                    e
                );
            }
        }

        pair.access_token
    }
}
