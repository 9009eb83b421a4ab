//! Local session cache.
//!
//! Outside CI there is no secrets store to read the session back from, so the
//! latest credential can also be kept in a local JSON file. The cache is
//! opt-in (`SESSION_CACHE_DIR`) and never synced anywhere.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Credential;

/// On-disk form of a cached session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    /// The `user_session` cookie value.
    pub token: String,

    /// When the session was captured.
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

/// File-backed cache holding the most recent provider session.
pub struct SessionCache {
    cache_dir: PathBuf,
}

impl SessionCache {
    /// Create a session cache at a custom location.
    pub fn with_path(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create session cache dir: {cache_dir:?}"))?;
        Ok(Self { cache_dir })
    }

    fn session_file(&self) -> PathBuf {
        self.cache_dir.join("session.json")
    }

    /// Load the cached credential, if any.
    pub fn load(&self) -> Result<Option<Credential>> {
        let path = self.session_file();
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session file: {path:?}"))?;
        let session: SessionData = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session file: {path:?}"))?;

        Ok(Credential::new(session.token))
    }

    /// Replace the cached credential.
    pub fn store(&self, credential: &Credential, captured_at: DateTime<Utc>) -> Result<()> {
        let path = self.session_file();
        let session = SessionData {
            token: credential.expose().to_string(),
            captured_at: Some(captured_at),
        };
        let content =
            serde_json::to_string_pretty(&session).context("Failed to serialize session")?;

        let mut file = open_private(&path)
            .with_context(|| format!("Failed to open session file: {path:?}"))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write session file: {path:?}"))?;

        Ok(())
    }

    /// Forget the cached credential.
    pub fn clear(&self) -> Result<()> {
        let path = self.session_file();
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete session file: {path:?}"))?;
        }
        Ok(())
    }
}

/// Open `path` for a fresh write, readable by the owner only before any byte lands.
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; tighten a file left by an older run.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
