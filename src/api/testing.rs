//! Scripted in-process backend for exercising the client pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::Semaphore;

use super::request::{ApiResponse, RequestDescriptor};
use super::transport::{Transport, TransportError};

/// How the mock answers `POST /refresh`.
#[derive(Debug, Clone)]
pub enum RefreshBehavior {
    Grant(String),
    Fail(u16),
    Unreachable,
}

/// One request as observed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub path: String,
    pub token: Option<String>,
}

/// Backend with one valid token.
///
/// Protected paths answer 200 (echoing the path) when the `auth-token` header
/// matches the valid token and 401 otherwise. `/forbidden`, `/broken` and
/// `/always-401` answer 403, 500 and 401 unconditionally.
pub struct MockBackend {
    valid_token: Mutex<Option<String>>,
    refresh: Mutex<RefreshBehavior>,
    login_token: String,
    seen: Mutex<Vec<Seen>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    held: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl MockBackend {
    pub fn new(refresh: RefreshBehavior) -> Arc<Self> {
        Arc::new(Self {
            valid_token: Mutex::new(None),
            refresh: Mutex::new(refresh),
            login_token: "LOGIN".to_string(),
            seen: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            held: Mutex::new(HashMap::new()),
        })
    }

    /// Hold every refresh call until [`MockBackend::release_refresh`].
    pub fn gate_refresh(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_refresh(&self) {
        if let Some(gate) = self.gate.lock().as_ref() {
            gate.add_permits(1024);
        }
    }

    /// Hold replies to `path` until [`MockBackend::release`]. The request is
    /// recorded on arrival; whether it is authorized is decided on release.
    pub fn hold(&self, path: &str) {
        self.held
            .lock()
            .insert(path.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, path: &str) {
        if let Some(gate) = self.held.lock().get(path) {
            gate.add_permits(1024);
        }
    }

    /// Make `token` valid for protected paths.
    pub fn accept(&self, token: &str) {
        *self.valid_token.lock() = Some(token.to_string());
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.seen.lock().iter().filter(|s| s.path == path).count()
    }

    /// Paths of the requests that carried `token`, in arrival order.
    pub fn seen_with_token(&self, token: &str) -> Vec<String> {
        self.seen
            .lock()
            .iter()
            .filter(|s| s.token.as_deref() == Some(token))
            .map(|s| s.path.clone())
            .collect()
    }

    async fn refresh(&self) -> Result<ApiResponse, TransportError> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }

        let behavior = self.refresh.lock().clone();
        match behavior {
            RefreshBehavior::Grant(token) => {
                *self.valid_token.lock() = Some(token.clone());
                let body = serde_json::json!({ "success": true, "accessToken": token });
                Ok(ApiResponse::new(StatusCode::OK, body.to_string()))
            }
            RefreshBehavior::Fail(code) => Ok(ApiResponse::new(
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                "refresh failed",
            )),
            RefreshBehavior::Unreachable => Err(TransportError::Connect("refused".into())),
        }
    }
}

#[async_trait]
impl Transport for MockBackend {
    async fn execute(&self, request: &RequestDescriptor) -> Result<ApiResponse, TransportError> {
        let token = request
            .headers
            .get("auth-token")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        self.seen.lock().push(Seen {
            path: request.path.clone(),
            token: token.clone(),
        });

        let resp = match request.path.as_str() {
            "/refresh" => return self.refresh().await,
            "/login" => {
                *self.valid_token.lock() = Some(self.login_token.clone());
                let body =
                    serde_json::json!({ "success": true, "accessToken": self.login_token });
                ApiResponse::new(StatusCode::OK, body.to_string())
            }
            "/logout" => ApiResponse::new(StatusCode::OK, "{}"),
            "/forbidden" => ApiResponse::new(StatusCode::FORBIDDEN, "nope"),
            "/broken" => ApiResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "oops"),
            "/always-401" => ApiResponse::new(StatusCode::UNAUTHORIZED, "expired"),
            path => {
                let held = self.held.lock().get(path).cloned();
                if let Some(gate) = held {
                    let _permit = gate.acquire().await;
                }
                let valid = self.valid_token.lock().clone();
                if token.is_some() && token == valid {
                    ApiResponse::new(StatusCode::OK, path.to_string())
                } else {
                    ApiResponse::new(StatusCode::UNAUTHORIZED, "expired")
                }
            }
        };
        Ok(resp)
    }
}

/// Yield until `cond` holds, failing the test after a few seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !cond() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}
