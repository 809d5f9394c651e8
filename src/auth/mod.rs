//! Session authentication for the storefront API
//!
//! The backend issues an opaque access token on login and on every session
//! renewal; the token travels in a header on each protected request.

pub mod file_store;
pub mod tokens;

use serde::{Deserialize, Serialize};

pub use file_store::FileTokenStore;
pub use tokens::{MemoryTokenStore, StoredToken, Token, TokenStore};

/// Credentials posted to the login endpoint
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Reply from the login and refresh endpoints
#[derive(Debug, Deserialize)]
pub struct SessionReply {
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "accessToken")]
    pub access_token: Option<String>,
}

impl SessionReply {
    /// The issued token, if the backend reported success and sent a non-empty one.
    pub fn into_token(self) -> Option<Token> {
        if !self.success {
            return None;
        }
        self.access_token
            .map(Token::from)
            .filter(|t| !t.is_empty())
    }
}
