//! Flat `KEY=VALUE` credential store
//!
//! The file holds the app identity (`APP_KEY`, `APP_SECRET`, `REDIRECT_URI`)
//! next to the token material, in the dotenv format the brokerage's own
//! tooling writes. Lines this store does not own are preserved.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::auth::error::{AuthError, Result};
use crate::auth::{StoreKey, StoreSnapshot, TokenStore};

/// Credential store backed by a dotenv file.
#[derive(Debug, Clone)]
pub struct EnvFileStore {
    path: PathBuf,
}

impl EnvFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<HashMap<String, String>> {
        let iter = dotenvy::from_path_iter(&self.path).map_err(|e| {
            if e.not_found() {
                AuthError::Config(format!(
                    "credential store {} not found",
                    self.path.display()
                ))
            } else {
                AuthError::Config(format!("failed to read {}: {}", self.path.display(), e))
            }
        })?;

        let mut entries = HashMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| {
                AuthError::Config(format!("failed to parse {}: {}", self.path.display(), e))
            })?;
            entries.insert(key, value);
        }
        Ok(entries)
    }

    /// Rewrite the file with `updates` applied, via a temp file and rename.
    fn write_entries(&self, updates: &[(StoreKey, String)]) -> io::Result<()> {
        let existing = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };

        let mut seen = HashSet::new();
        let mut lines: Vec<String> = existing
            .lines()
            .map(|line| {
                let update = line_key(line)
                    .and_then(|key| updates.iter().find(|(k, _)| k.as_str() == key));
                match update {
                    Some((key, value)) => {
                        seen.insert(*key);
                        format_line(*key, value)
                    }
                    None => line.to_string(),
                }
            })
            .collect();
        for (key, value) in updates {
            if seen.insert(*key) {
                lines.push(format_line(*key, value));
            }
        }

        let mut content = lines.join("\n");
        content.push('\n');

        let tmp = self.tmp_path();
        {
            let mut file = create_private(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&tmp, &self.path)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| ".env".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl TokenStore for EnvFileStore {
    fn load(&self) -> Result<StoreSnapshot> {
        StoreSnapshot::from_entries(&self.read_entries()?)
    }

    fn update(&mut self, key: StoreKey, value: &str) -> Result<()> {
        self.update_all(&[(key, value.to_string())])
    }

    /// All fields land in a single rename, so a crash leaves either the
    /// old or the new token pair on disk, never a mix.
    fn update_all(&mut self, entries: &[(StoreKey, String)]) -> Result<()> {
        for (key, _) in entries {
            tracing::info!("Updating {} in {}", key.as_str(), self.path.display());
        }
        self.write_entries(entries).map_err(AuthError::Persistence)
    }
}

/// Open `path` for writing, owner-only before any byte lands in it.
fn create_private(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let file = options.open(path)?;

    // `mode` only applies on creation; a stale temp file keeps its bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    Ok(file)
}

/// Key of a `KEY=VALUE` line, ignoring comments and `export `.
fn line_key(line: &str) -> Option<&str> {
    let line = line.trim_start();
    if line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, _) = line.split_once('=')?;
    Some(key.trim())
}

fn format_line(key: StoreKey, value: &str) -> String {
    if value.contains('\'') {
        // Double quotes expand `$VAR` on load.
        let escaped = value
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('$', "\\$");
        format!("{}=\"{}\"", key.as_str(), escaped)
    } else {
        format!("{}='{}'", key.as_str(), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{TokenPolicy, TokenRecord};

    const NOW: u64 = 1_750_000_000;

    fn seeded(dir: &tempfile::TempDir, extra: &str) -> EnvFileStore {
        let path = dir.path().join(".env");
        fs::write(
            &path,
            format!(
                "# brokerage app\nAPP_KEY=key123\nAPP_SECRET='s3cret'\nREDIRECT_URI=https://127.0.0.1\n{}",
                extra
            ),
        )
        .unwrap();
        EnvFileStore::new(path)
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvFileStore::new(dir.path().join(".env"));
        assert!(matches!(store.load(), Err(AuthError::Config(_))));
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "APP_KEY=key123\n").unwrap();
        match EnvFileStore::new(path).load() {
            Err(AuthError::Config(msg)) => assert!(msg.contains("APP_SECRET")),
            other => panic!("unexpected: {:?}", other.map(|s| s.credentials)),
        }
    }

    #[test]
    fn test_load_credentials_only() {
        let dir = tempfile::tempdir().unwrap();
        let snap = seeded(&dir, "").load().unwrap();
        assert_eq!(snap.credentials.app_key, "key123");
        assert_eq!(snap.credentials.app_secret, "s3cret");
        assert_eq!(snap.credentials.redirect_uri, "https://127.0.0.1");
        assert!(!snap.access.is_present());
    }

    #[test]
    fn test_load_float_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(
            &dir,
            "ACCESS_TOKEN='I0.b2F@'\nACCESS_TOKEN_TIME='1749999000.25'\nREFRESH_TOKEN=rt\nREFRESH_TOKEN_TIME=1749990000\n",
        );
        let snap = store.load().unwrap();
        assert_eq!(snap.access, TokenRecord::new("I0.b2F@", 1_749_999_000));
        assert_eq!(snap.refresh, TokenRecord::new("rt", 1_749_990_000));
    }

    #[test]
    fn test_update_replaces_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded(&dir, "ACCESS_TOKEN=old\nOTHER=keep\n");

        store.update(StoreKey::AccessToken, "new@token").unwrap();
        store.update(StoreKey::AccessTokenTime, "1750000000").unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.starts_with("# brokerage app\n"));
        assert!(content.contains("ACCESS_TOKEN='new@token'\n"));
        assert!(content.contains("OTHER=keep\n"));
        assert!(content.ends_with("ACCESS_TOKEN_TIME='1750000000'\n"));
        assert!(!content.contains("old"));

        let snap = store.load().unwrap();
        assert_eq!(snap.access, TokenRecord::new("new@token", NOW));
    }

    #[test]
    fn test_duplicate_keys_all_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded(&dir, "REFRESH_TOKEN=a\nREFRESH_TOKEN=b\n");
        store.update(StoreKey::RefreshToken, "c").unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(content.matches("REFRESH_TOKEN='c'").count(), 2);
        assert_eq!(store.load().unwrap().refresh.value.as_deref(), Some("c"));
    }

    #[test]
    fn test_value_with_quote_survives() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded(&dir, "");
        store.update(StoreKey::AccessToken, "it's\"odd").unwrap();
        assert_eq!(
            store.load().unwrap().access.value.as_deref(),
            Some("it's\"odd")
        );
    }

    #[test]
    fn test_quoted_value_with_dollar_survives() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded(&dir, "");
        store.update(StoreKey::RefreshToken, "a'b$HOME${X}").unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains(r#"REFRESH_TOKEN="a'b\$HOME\${X}""#));
        assert_eq!(
            store.load().unwrap().refresh.value.as_deref(),
            Some("a'b$HOME${X}")
        );
    }

    #[test]
    fn test_round_trip_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded(&dir, "");
        let policy = TokenPolicy::default();
        let access = TokenRecord::new("at", NOW - 1750);
        let refresh = TokenRecord::new("rt", NOW - 3600);
        let before = policy.evaluate(NOW, &access, &refresh);

        store
            .update_all(&[
                (StoreKey::AccessToken, "at".to_string()),
                (StoreKey::AccessTokenTime, (NOW - 1750).to_string()),
                (StoreKey::RefreshToken, "rt".to_string()),
                (StoreKey::RefreshTokenTime, (NOW - 3600).to_string()),
            ])
            .unwrap();

        let snap = EnvFileStore::new(store.path()).load().unwrap();
        assert_eq!(snap.access, access);
        assert_eq!(snap.refresh, refresh);
        assert_eq!(policy.evaluate(NOW, &snap.access, &snap.refresh), before);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded(&dir, "");
        store.update(StoreKey::AccessToken, "x").unwrap();
        assert!(!dir.path().join(".env.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded(&dir, "");
        store.update(StoreKey::AccessToken, "x").unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_temp_file_is_private_before_write() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fresh.tmp");
        create_private(&fresh).unwrap();
        let mode = fs::metadata(&fresh).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let stale = dir.path().join(".env.tmp");
        fs::write(&stale, "junk").unwrap();
        fs::set_permissions(&stale, fs::Permissions::from_mode(0o644)).unwrap();
        create_private(&stale).unwrap();
        let mode = fs::metadata(&stale).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read_to_string(&stale).unwrap(), "");
    }

    #[test]
    fn test_line_key() {
        assert_eq!(line_key("APP_KEY=abc"), Some("APP_KEY"));
        assert_eq!(line_key("  export APP_KEY = abc"), Some("APP_KEY"));
        assert_eq!(line_key("# APP_KEY=abc"), None);
        assert_eq!(line_key(""), None);
    }
}
