//! Authenticated HTTP client for the storefront API
//!
//! Signs every request with the stored session token and recovers from
//! expired sessions through the [`RefreshCoordinator`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::classify::classify;
use super::error::{ApiError, ApiResult, AuthFailure};
use super::refresh::RefreshCoordinator;
use super::request::{ApiResponse, RequestDescriptor};
use super::signer::{RequestSigner, DEFAULT_TOKEN_HEADER};
use super::transport::{ReqwestTransport, Transport};
use crate::auth::{Credentials, SessionReply, TokenStore};
use crate::config::Config;

/// Client façade: sign, execute, classify, recover.
pub struct Client {
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    signer: RequestSigner,
    coordinator: RefreshCoordinator,
    login_path: String,
    logout_path: String,
}

impl Client {
    /// Client with default header name and endpoint paths.
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn TokenStore>) -> Self {
        let defaults = Config::default();
        Self::assemble(transport, store, RequestSigner::default(), &defaults)
    }

    /// Build a reqwest-backed client from configuration.
    pub fn from_config(config: &Config, store: Arc<dyn TokenStore>) -> ApiResult<Self> {
        let transport = ReqwestTransport::new(&config.base_url, config.timeout())?;
        Self::with_transport(config, Arc::new(transport), store)
    }

    /// Configured client over any transport.
    pub fn with_transport(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
    ) -> ApiResult<Self> {
        let signer = if config.token_header.is_empty() {
            RequestSigner::new(DEFAULT_TOKEN_HEADER)?
        } else {
            RequestSigner::new(&config.token_header)?
        };
        Ok(Self::assemble(transport, store, signer, config))
    }

    fn assemble(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        signer: RequestSigner,
        config: &Config,
    ) -> Self {
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            transport.clone(),
            signer.clone(),
            config.refresh_path.clone(),
        );
        Self {
            transport,
            store,
            signer,
            coordinator,
            login_path: config.login_path.clone(),
            logout_path: config.logout_path.clone(),
        }
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Send a request, renewing the session and replaying it on a first 401.
    pub async fn send(&self, request: RequestDescriptor) -> ApiResult<ApiResponse> {
        let signed_with = self.coordinator.signing_state();
        let signed = self.signer.sign(request.clone(), signed_with.token.as_ref());
        tracing::debug!("{} {}", signed.method, signed.path);

        let attempt = self.transport.execute(&signed).await;
        match classify(attempt, request.retried) {
            Err(e) if e.is_retryable_auth() => {
                tracing::debug!("401 for {} {}, handing to renewal", request.method, request.path);
                self.coordinator.recover(request, signed_with).await
            }
            other => other,
        }
    }

    /// Send and decode a JSON reply.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestDescriptor) -> ApiResult<T> {
        self.send(request).await?.json()
    }

    pub async fn get(&self, path: &str) -> ApiResult<ApiResponse> {
        self.send(RequestDescriptor::get(path)).await
    }

    pub async fn delete(&self, path: &str) -> ApiResult<ApiResponse> {
        self.send(RequestDescriptor::delete(path)).await
    }

    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> ApiResult<ApiResponse> {
        self.send(RequestDescriptor::post(path).json(body)?).await
    }

    pub async fn put<B: Serialize>(&self, path: &str, body: &B) -> ApiResult<ApiResponse> {
        self.send(RequestDescriptor::put(path).json(body)?).await
    }

    pub async fn patch<B: Serialize>(&self, path: &str, body: &B) -> ApiResult<ApiResponse> {
        self.send(RequestDescriptor::patch(path).json(body)?).await
    }

    /// Log in and store the issued token.
    ///
    /// Rejected credentials come back as an exhausted auth failure; a login
    /// never starts a session renewal.
    pub async fn login(&self, credentials: &Credentials) -> ApiResult<()> {
        let request = RequestDescriptor::post(self.login_path.clone()).json(credentials)?;
        tracing::info!("Logging in as {}", credentials.email);

        let resp = classify(self.transport.execute(&request).await, true)?;
        let status = resp.status.as_u16();
        let body = resp.text();
        let reply: SessionReply = resp.json()?;

        match reply.into_token() {
            Some(token) => {
                self.store.set(token);
                tracing::info!("Login successful");
                Ok(())
            }
            None => Err(ApiError::Auth {
                kind: AuthFailure::Exhausted,
                status,
                body,
            }),
        }
    }

    /// Clear the session. The backend is told on a best-effort basis.
    pub async fn logout(&self) {
        let token = self.store.get();
        let request = self
            .signer
            .sign(RequestDescriptor::post(self.logout_path.clone()), token.as_ref());

        if let Err(e) = classify(self.transport.execute(&request).await, true) {
            tracing::warn!("Logout notification failed: {}", e);
        }
        self.store.clear();
    }
}
