//! Token storage and management

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Opaque session credential issued by the storefront backend.
///
/// The value is never printed through `Debug`; use [`Token::as_str`] when the
/// raw credential is needed for a header.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Stored session token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: Token,
    pub stored_at: DateTime<Utc>,
}

impl StoredToken {
    pub fn new(token: Token) -> Self {
        Self {
            token,
            stored_at: Utc::now(),
        }
    }
}

/// Token store trait for different storage backends.
///
/// Holds at most one current token. Writers are serialized by the refresh
/// coordinator, so implementations only need to hand out consistent snapshots.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Option<Token>;
    fn set(&self, token: Token);
    fn clear(&self);

    /// Snapshot with the time the token was stored, for status reporting.
    fn stored(&self) -> Option<StoredToken>;
}

/// Process-local token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    current: RwLock<Option<StoredToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<Token>) -> Self {
        Self {
            current: RwLock::new(Some(StoredToken::new(token.into()))),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<Token> {
        self.current.read().as_ref().map(|s| s.token.clone())
    }

    fn set(&self, token: Token) {
        *self.current.write() = Some(StoredToken::new(token));
    }

    fn clear(&self) {
        *self.current.write() = None;
    }

    fn stored(&self) -> Option<StoredToken> {
        self.current.read().clone()
    }
}
