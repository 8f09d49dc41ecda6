//! Background access-token renewal
//!
//! One task per [`AuthManager`]: sleep for `access_ttl - safety_margin`,
//! renew without prompting, repeat. Network failures are retried with
//! backoff. When renewal needs an operator the loop broadcasts
//! [`RenewalEvent::LoginRequired`] and parks until a foreground login
//! succeeds. Dropping the handle does not stop the task; call
//! [`RenewalScheduler::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::AuthError;
use super::manager::AuthManager;

/// Conditions the renewal task hands to the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalEvent {
    /// A renewal cycle failed after retries; the next cycle tries again.
    RenewalFailed { error: String },
    /// The refresh token is gone or rejected. Renewal is paused until an
    /// operator completes a login at `authorization_url`.
    LoginRequired { authorization_url: String },
    /// An interactive login completed and renewal resumed.
    Resumed,
}

/// Handle to the running renewal task.
pub struct RenewalScheduler {
    shutdown: CancellationToken,
    events: broadcast::Sender<RenewalEvent>,
    handle: JoinHandle<()>,
}

impl RenewalScheduler {
    /// Start renewing every `access_ttl - safety_margin`.
    pub fn spawn(manager: Arc<AuthManager>) -> Self {
        let interval = manager.token_policy().renewal_interval();
        Self::spawn_with_interval(manager, interval)
    }

    pub fn spawn_with_interval(manager: Arc<AuthManager>, interval: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let (events, _) = broadcast::channel(16);
        let handle = tokio::spawn(run(manager, interval, shutdown.clone(), events.clone()));
        Self {
            shutdown,
            events,
            handle,
        }
    }

    /// Receive events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RenewalEvent> {
        self.events.subscribe()
    }

    /// Token that stops the loop when cancelled; useful to tie the
    /// scheduler to a wider shutdown signal.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Renewal task ended abnormally: {}", e);
        }
    }
}

enum Outcome {
    Renewed,
    NeedsLogin,
    Failed(AuthError),
    Cancelled,
}

async fn run(
    manager: Arc<AuthManager>,
    interval: Duration,
    shutdown: CancellationToken,
    events: broadcast::Sender<RenewalEvent>,
) {
    tracing::info!("Launching access token renewal task (every {:?})", interval);
    let mut logins = manager.subscribe_logins();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }

        logins.borrow_and_update();
        match renew_with_backoff(&manager, &shutdown).await {
            Outcome::Renewed => {}
            Outcome::Cancelled => break,
            Outcome::Failed(e) => {
                tracing::warn!("Renewal failed, will retry next cycle: {}", e);
                // No subscribers is fine.
                let _ = events.send(RenewalEvent::RenewalFailed {
                    error: e.to_string(),
                });
            }
            Outcome::NeedsLogin => {
                tracing::error!(
                    "Renewal paused: run an interactive login to resume automatic renewal"
                );
                let _ = events.send(RenewalEvent::LoginRequired {
                    authorization_url: manager.authorization_url(),
                });
                tokio::select! {
                    changed = logins.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        tracing::info!("Interactive login completed, resuming renewal");
                        let _ = events.send(RenewalEvent::Resumed);
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        }
    }

    tracing::info!("Access token renewal task stopped");
}

async fn renew_with_backoff(manager: &AuthManager, shutdown: &CancellationToken) -> Outcome {
    let retry = manager.retry_policy();
    let attempts = retry.attempts();

    for attempt in 1..=attempts {
        let result = tokio::select! {
            r = manager.ensure_authenticated_background() => r,
            _ = shutdown.cancelled() => return Outcome::Cancelled,
        };

        match result {
            Ok(()) => return Outcome::Renewed,
            Err(AuthError::InteractiveLoginRequired) => return Outcome::NeedsLogin,
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = retry.delay(attempt);
                tracing::warn!(
                    "Renewal attempt {}/{} failed: {}; retrying in {:?}",
                    attempt,
                    attempts,
                    e,
                    delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return Outcome::Cancelled,
                }
            }
            Err(e) => return Outcome::Failed(e),
        }
    }
    Outcome::Failed(AuthError::Config("no renewal attempts configured".to_string()))
}
