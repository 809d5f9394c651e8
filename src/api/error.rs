//! Client error taxonomy.

use std::fmt;

use thiserror::Error;

/// Flavour of a 401 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// First 401 for this request; the session may be renewed and the request replayed.
    Retryable,
    /// 401 on a request that was already replayed once.
    Exhausted,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retryable => f.write_str("retryable"),
            Self::Exhausted => f.write_str("exhausted"),
        }
    }
}

/// Why a session renewal call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenewalError {
    /// Renewal endpoint answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// No response from the renewal endpoint.
    #[error("network error: {0}")]
    Network(String),

    /// 2xx reply that did not carry a usable token.
    #[error("renewal reply did not grant a token")]
    NoToken,
}

/// Errors surfaced by [`Client`](super::Client).
///
/// `Clone` so that a single renewal failure can be handed to every queued caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// No response received.
    #[error("network error: {0}")]
    Network(String),

    /// 401 from a protected endpoint.
    #[error("authentication failed ({kind}, HTTP {status}): {body}")]
    Auth {
        kind: AuthFailure,
        status: u16,
        body: String,
    },

    /// 403.
    #[error("permission denied (HTTP 403): {body}")]
    Permission { body: String },

    /// Any other 4xx.
    #[error("request rejected (HTTP {status}): {body}")]
    Validation { status: u16, body: String },

    /// 5xx.
    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    /// The session renewal triggered by this request failed.
    #[error("session renewal failed: {0}")]
    Renewal(#[from] RenewalError),

    /// Request could not be built (bad path, bad header value).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to encode request body: {0}")]
    Encode(String),

    #[error("failed to decode response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Auth { status, .. }
            | Self::Validation { status, .. }
            | Self::Server { status, .. } => Some(*status),
            Self::Permission { .. } => Some(403),
            _ => None,
        }
    }

    /// Eligible for the session renewal protocol.
    pub fn is_retryable_auth(&self) -> bool {
        matches!(
            self,
            Self::Auth {
                kind: AuthFailure::Retryable,
                ..
            }
        )
    }

    /// The session cannot be recovered without a fresh login.
    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            Self::Renewal(_)
                | Self::Auth {
                    kind: AuthFailure::Exhausted,
                    ..
                }
        )
    }
}

/// Result type for client operations.
pub type ApiResult<T> = Result<T, ApiError>;
