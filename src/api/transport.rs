//! Transport seam and its reqwest implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use url::Url;

use super::error::ApiError;
use super::request::{ApiResponse, RequestDescriptor};

/// A request that produced no response.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Executes one request descriptor.
///
/// Any status code is a successful execution; classification happens later.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &RequestDescriptor) -> Result<ApiResponse, TransportError>;
}

/// HTTP transport over reqwest.
///
/// Keeps a cookie jar, which is where the backend's renewal credential lives.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, ApiError> {
        let mut builder = Client::builder().cookie_store(true);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ApiError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        Self::with_client(http, base_url)
    }

    /// Use a preconfigured reqwest client.
    pub fn with_client(http: Client, base_url: &str) -> Result<Self, ApiError> {
        Url::parse(base_url)
            .map_err(|e| ApiError::InvalidRequest(format!("base URL {base_url:?}: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve a request path against the base URL, keeping the base path prefix.
    pub fn url_for(&self, path: &str) -> Result<Url, ApiError> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        };
        Url::parse(&raw).map_err(|e| ApiError::InvalidRequest(format!("{raw}: {e}")))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &RequestDescriptor) -> Result<ApiResponse, TransportError> {
        let url = self
            .url_for(&request.path)
            .map_err(|e| TransportError::Other(e.to_string()))?;
        tracing::debug!("{} {}", request.method, url);

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
