//! On-disk session token store
//!
//! Keeps the current token in memory and mirrors every change to a TOML file
//! so the session survives process restarts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::tokens::{StoredToken, Token, TokenStore};
use crate::config::Config;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    session: Option<StoredToken>,
}

/// Token store backed by `session.toml`.
///
/// The in-memory snapshot is authoritative: if the file cannot be written the
/// failure is logged and the process keeps using the new value.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    current: RwLock<Option<StoredToken>>,
}

impl FileTokenStore {
    /// Open the store at the default location in the config directory.
    pub fn open_default() -> Result<Self> {
        Self::open(Config::config_dir()?.join("session.toml"))
    }

    /// Open the store at `path`, loading any persisted session.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read session file")?;
            let file: SessionFile =
                toml::from_str(&content).context("Failed to parse session file")?;
            file.session
        } else {
            None
        };

        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, session: Option<StoredToken>) {
        if let Err(e) = write_session(&self.path, SessionFile { session }) {
            tracing::warn!("Failed to persist session to {}: {:#}", self.path.display(), e);
        }
    }
}

fn write_session(path: &Path, file: SessionFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).context("Failed to create session directory")?;
    }

    let content = toml::to_string_pretty(&file).context("Failed to serialize session")?;
    fs::write(path, content).context("Failed to write session file")?;

    // Session file holds a live credential
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, perms).context("Failed to set session file permissions")?;
    }

    Ok(())
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<Token> {
        self.current.read().as_ref().map(|s| s.token.clone())
    }

    fn set(&self, token: Token) {
        let stored = StoredToken::new(token);
        let mut current = self.current.write();
        *current = Some(stored.clone());
        self.persist(Some(stored));
    }

    fn clear(&self) {
        let mut current = self.current.write();
        *current = None;
        self.persist(None);
    }

    fn stored(&self) -> Option<StoredToken> {
        self.current.read().clone()
    }
}
