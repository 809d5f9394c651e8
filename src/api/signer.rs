//! Credential header injection.

use reqwest::header::{HeaderName, HeaderValue};

use super::error::ApiError;
use super::request::RequestDescriptor;
use crate::auth::Token;

/// Header the storefront backend reads the session token from.
pub const DEFAULT_TOKEN_HEADER: &str = "auth-token";

/// Sets the session token header on outbound requests.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    header_name: HeaderName,
}

impl RequestSigner {
    pub fn new(header_name: &str) -> Result<Self, ApiError> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .map_err(|e| ApiError::InvalidRequest(format!("token header {header_name:?}: {e}")))?;
        Ok(Self { header_name })
    }

    /// Return `request` carrying `token`, or unchanged when there is no token.
    ///
    /// Any earlier value of the header is replaced, so a replay never carries
    /// the credential it originally failed with.
    pub fn sign(&self, mut request: RequestDescriptor, token: Option<&Token>) -> RequestDescriptor {
        let Some(token) = token else {
            return request;
        };

        match HeaderValue::from_str(token.as_str()) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers.insert(self.header_name.clone(), value);
            }
            Err(_) => {
                // Sent unsigned; the backend answers 401 and renewal takes over.
                tracing::warn!("Session token is not a valid header value, sending unsigned");
            }
        }
        request
    }
}

impl Default for RequestSigner {
    fn default() -> Self {
        Self {
            header_name: HeaderName::from_static(DEFAULT_TOKEN_HEADER),
        }
    }
}
