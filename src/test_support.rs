//! Fakes shared by unit tests

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::auth::error::{AuthError, Result};
use crate::auth::{
    Clock, Credentials, Grant, LoginFlow, StoreKey, StoreSnapshot, TokenExchanger, TokenPair,
    TokenStore,
};

pub(crate) const NOW: u64 = 1_750_000_000;

pub(crate) fn credentials() -> Credentials {
    Credentials {
        app_key: "APPKEY".to_string(),
        app_secret: "secret".to_string(),
        redirect_uri: "https://127.0.0.1".to_string(),
    }
}

/// A real `reqwest::Error`, wrapped.
pub(crate) fn network_error() -> AuthError {
    let err = reqwest::Client::new()
        .get("not a url")
        .build()
        .expect_err("relative URL must not build");
    AuthError::Network(err)
}

/// Ordered record of what the fakes were asked to do.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub(crate) fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Manually driven clock.
#[derive(Debug)]
pub(crate) struct ManualClock(AtomicU64);

impl ManualClock {
    pub(crate) fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub(crate) fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// In-memory key/value store; clones share contents.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl MemoryStore {
    pub(crate) fn with_credentials() -> Self {
        let store = Self::default();
        let creds = credentials();
        store.set(StoreKey::AppKey, &creds.app_key);
        store.set(StoreKey::AppSecret, &creds.app_secret);
        store.set(StoreKey::RedirectUri, &creds.redirect_uri);
        store
    }

    pub(crate) fn with_tokens(access: (&str, u64), refresh: (&str, u64)) -> Self {
        let store = Self::with_credentials();
        store.set(StoreKey::AccessToken, access.0);
        store.set(StoreKey::AccessTokenTime, &access.1.to_string());
        store.set(StoreKey::RefreshToken, refresh.0);
        store.set(StoreKey::RefreshTokenTime, &refresh.1.to_string());
        store
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    pub(crate) fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: StoreKey, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.as_str().to_string(), value.to_string());
    }
}

impl TokenStore for MemoryStore {
    fn load(&self) -> Result<StoreSnapshot> {
        StoreSnapshot::from_entries(&self.entries.lock().unwrap())
    }

    fn update(&mut self, key: StoreKey, value: &str) -> Result<()> {
        if *self.fail_writes.lock().unwrap() {
            return Err(AuthError::Persistence(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only store",
            )));
        }
        self.set(key, value);
        Ok(())
    }
}

/// Scripted token endpoint outcome.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Tokens(&'static str, &'static str),
    Rejected,
    Network,
}

/// Token endpoint fake. Unscripted calls succeed with `at-<n>` and echo the
/// refresh token (or `rt-login` for authorization-code grants).
pub(crate) struct FakeExchanger {
    replies: Mutex<VecDeque<Reply>>,
    grants: Mutex<Vec<Grant>>,
    calls: AtomicUsize,
    delay: Mutex<Duration>,
    events: EventLog,
}

impl FakeExchanger {
    pub(crate) fn new(events: EventLog) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            grants: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            events,
        }
    }

    pub(crate) fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn grants(&self) -> Vec<Grant> {
        self.grants.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenExchanger for FakeExchanger {
    async fn exchange(&self, _credentials: &Credentials, grant: &Grant) -> Result<TokenPair> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.events.push(format!("exchange:{}", grant.kind()));
        self.grants.lock().unwrap().push(grant.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Tokens(access, refresh)) => Ok(TokenPair {
                access_token: access.to_string(),
                refresh_token: refresh.to_string(),
            }),
            Some(Reply::Rejected) => Err(AuthError::ExchangeRejected {
                status: Some(400),
                reason: "invalid_grant".to_string(),
            }),
            Some(Reply::Network) => Err(network_error()),
            None => {
                let refresh_token = match grant {
                    Grant::RefreshToken { refresh_token } => refresh_token.clone(),
                    Grant::AuthorizationCode { .. } => "rt-login".to_string(),
                };
                Ok(TokenPair {
                    access_token: format!("at-{}", n),
                    refresh_token,
                })
            }
        }
    }
}

/// Operator stand-in that answers with a fixed code, after an optional
/// think time.
pub(crate) struct FakeLogin {
    code: String,
    calls: AtomicUsize,
    delay: Mutex<Duration>,
    events: EventLog,
}

impl FakeLogin {
    pub(crate) fn new(code: &str, events: EventLog) -> Self {
        Self {
            code: code.to_string(),
            calls: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            events,
        }
    }

    /// Runs on a blocking thread, so this is wall-clock time.
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LoginFlow for FakeLogin {
    fn authorization_code(&self, authorization_url: &str) -> Result<String> {
        assert!(authorization_url.contains("/authorize?client_id="));
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.events.push("login");
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(self.code.clone())
    }
}

/// What the one-shot server received.
#[derive(Debug)]
pub(crate) struct CapturedRequest {
    pub head: String,
    pub body: String,
}

/// Accepts one HTTP/1.1 connection, replies with a canned JSON body, and
/// hands back the request it saw.
pub(crate) struct OneShotServer {
    addr: SocketAddr,
    rx: oneshot::Receiver<CapturedRequest>,
}

impl OneShotServer {
    pub(crate) async fn start(status: u16, body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        let body = body.to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let reason = if status < 300 { "OK" } else { "Error" };
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            let _ = tx.send(request);
        });

        Self { addr, rx }
    }

    pub(crate) fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) async fn request(self) -> CapturedRequest {
        self.rx.await.unwrap()
    }
}

async fn read_request(socket: &mut TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            let len = head
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                let body = String::from_utf8_lossy(&buf[end + 4..end + 4 + len]).into_owned();
                return CapturedRequest { head, body };
            }
        }

        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return CapturedRequest {
                head: String::from_utf8_lossy(&buf).into_owned(),
                body: String::new(),
            };
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
