//! Interactive authorization-code capture
//!
//! The operator opens the authorization URL, consents in the browser, and
//! pastes back the URL they were redirected to. The URL carries a
//! single-use code, so it is read from the terminal without echo. This
//! blocks and must only run where a human is present.

use std::io::{self, Write};

use super::error::{AuthError, Result};
use super::Credentials;

const CODE_MARKER: &str = "code=";
const CODE_TERMINATOR: &str = "%40";
const PROMPT: &str = "> Enter response url: ";

/// Build `{oauth_base}/authorize?client_id=..&redirect_uri=..`.
///
/// Values are inserted verbatim; the endpoint expects the redirect URI
/// exactly as registered.
pub fn authorization_url(oauth_base: &str, credentials: &Credentials) -> String {
    format!(
        "{}/authorize?client_id={}&redirect_uri={}",
        oauth_base.trim_end_matches('/'),
        credentials.app_key,
        credentials.redirect_uri
    )
}

/// Pull the authorization code out of a redirect URL.
///
/// Takes everything between the first `code=` and the following `%40`,
/// then restores the `@` the endpoint always ends codes with.
pub fn extract_code(redirect_url: &str) -> Result<String> {
    let start = redirect_url
        .find(CODE_MARKER)
        .map(|idx| idx + CODE_MARKER.len())
        .ok_or(AuthError::MalformedRedirect)?;
    let len = redirect_url[start..]
        .find(CODE_TERMINATOR)
        .ok_or(AuthError::MalformedRedirect)?;
    Ok(format!("{}@", &redirect_url[start..start + len]))
}

/// Source of authorization codes. Implementations may block indefinitely.
pub trait LoginFlow: Send + Sync {
    fn authorization_code(&self, authorization_url: &str) -> Result<String>;
}

/// Opens the browser and reads the redirect URL from the terminal.
#[derive(Debug, Clone)]
pub struct TerminalLogin {
    /// Prompts before giving up on malformed input.
    pub max_prompts: u32,
    pub open_browser: bool,
}

impl Default for TerminalLogin {
    fn default() -> Self {
        Self {
            max_prompts: 3,
            open_browser: true,
        }
    }
}

impl TerminalLogin {
    /// Show `url`, then ask for the redirect URL through `read_url`, which
    /// prints its prompt and returns one line without the newline.
    fn prompt<W, F>(&self, url: &str, out: &mut W, mut read_url: F) -> Result<String>
    where
        W: Write,
        F: FnMut(&str) -> io::Result<String>,
    {
        let io_err = |e: io::Error| AuthError::LoginAborted(e.to_string());

        if self.open_browser {
            tracing::info!("Opening web browser to brokerage login");
            if let Err(e) = open::that(url) {
                tracing::warn!("Could not open browser: {}", e);
            }
        }

        writeln!(out).map_err(io_err)?;
        writeln!(out, "To sign in, visit: {}", url).map_err(io_err)?;
        writeln!(out).map_err(io_err)?;

        for attempt in 1..=self.max_prompts.max(1) {
            let line = match read_url(PROMPT) {
                Ok(line) => line,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(AuthError::LoginAborted("input closed".to_string()));
                }
                Err(e) => return Err(io_err(e)),
            };

            match extract_code(line.trim()) {
                Ok(code) => return Ok(code),
                Err(e) if attempt < self.max_prompts => {
                    writeln!(out, "{}. Paste the full URL from the address bar.", e)
                        .map_err(io_err)?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(AuthError::MalformedRedirect)
    }
}

impl LoginFlow for TerminalLogin {
    fn authorization_code(&self, authorization_url: &str) -> Result<String> {
        let mut out = io::stderr();
        self.prompt(authorization_url, &mut out, |p| rpassword::prompt_password(p))
    }
}
