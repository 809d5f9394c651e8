//! Single-flight session renewal.
//!
//! When a protected request comes back 401 the client hands it to the
//! [`RefreshCoordinator`]. The first such request of a wave starts the one
//! renewal call; every other request failing while it runs is parked in the
//! episode's [`RetryQueue`]. When the renewal settles the queue is taken out
//! of the shared state under the same lock that returns it to idle, and each
//! parked request is replayed with the new token or rejected with the
//! renewal error.
//!
//! Every settled renewal bumps a generation counter. A request remembers the
//! generation it was signed under ([`SignedWith`]), so a 401 that only comes
//! back after its wave's renewal settled is answered from that outcome
//! instead of starting another renewal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::classify::classify;
use super::error::{ApiError, ApiResult, AuthFailure, RenewalError};
use super::queue::{DrainOutcome, PendingRequest, RetryQueue};
use super::request::{ApiResponse, RequestDescriptor};
use super::signer::RequestSigner;
use super::transport::Transport;
use crate::auth::{SessionReply, Token, TokenStore};

enum RefreshState {
    Idle,
    Refreshing(RetryQueue),
}

struct Shared {
    phase: RefreshState,
    /// Renewals settled so far.
    generation: u64,
    /// Error of the latest settled renewal, `None` if it succeeded.
    last_failure: Option<RenewalError>,
}

/// Session state a request was signed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedWith {
    pub token: Option<Token>,
    pub generation: u64,
}

/// What a failed request does after the state has been inspected.
enum Recovery {
    /// The store holds a newer token than the one the request used.
    Replay(Token),
    /// The renewal for this request's wave already failed.
    Reject(RenewalError),
    /// This request started the renewal.
    Owner(oneshot::Receiver<ApiResult<ApiResponse>>),
    /// A renewal is in flight; wait for it.
    Queued(oneshot::Receiver<ApiResult<ApiResponse>>),
}

struct Inner {
    state: Mutex<Shared>,
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    signer: RequestSigner,
    refresh_path: String,
    renewals: AtomicU64,
}

/// Coordinates session renewal for one client.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
        signer: RequestSigner,
        refresh_path: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(Shared {
                    phase: RefreshState::Idle,
                    generation: 0,
                    last_failure: None,
                }),
                store,
                transport,
                signer,
                refresh_path: refresh_path.into(),
                renewals: AtomicU64::new(0),
            }),
        }
    }

    /// Current token and renewal generation, read together.
    ///
    /// Take this right before signing a request and hand it back to
    /// [`RefreshCoordinator::recover`] if the request fails with a 401.
    pub fn signing_state(&self) -> SignedWith {
        let state = self.inner.state.lock();
        SignedWith {
            token: self.inner.store.get(),
            generation: state.generation,
        }
    }

    /// Recover `request` from a retryable 401.
    ///
    /// `signed` is what [`RefreshCoordinator::signing_state`] returned when
    /// the failed attempt was signed. Resolves to the replayed response, or
    /// to the renewal error if the session could not be renewed.
    pub async fn recover(
        &self,
        request: RequestDescriptor,
        signed: SignedWith,
    ) -> ApiResult<ApiResponse> {
        if request.retried {
            return Err(exhausted());
        }

        let recovery = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            match &mut state.phase {
                RefreshState::Refreshing(queue) => Recovery::Queued(park(queue, request.clone())),
                RefreshState::Idle => {
                    let current = self.inner.store.get();
                    let settled_since = state.generation != signed.generation;
                    match (current, &state.last_failure) {
                        (Some(current), _) if signed.token.as_ref() != Some(&current) => {
                            Recovery::Replay(current)
                        }
                        (None, Some(failure)) if settled_since => {
                            Recovery::Reject(failure.clone())
                        }
                        _ => {
                            let mut queue = RetryQueue::new();
                            let rx = park(&mut queue, request.clone());
                            state.phase = RefreshState::Refreshing(queue);
                            Recovery::Owner(rx)
                        }
                    }
                }
            }
        };

        match recovery {
            Recovery::Replay(token) => {
                tracing::debug!(
                    "Token changed since {} {} was sent, replaying without renewal",
                    request.method,
                    request.path
                );
                self.inner.replay(request, token).await
            }
            Recovery::Reject(failure) => {
                tracing::debug!(
                    "Renewal for {} {} already failed, not renewing again",
                    request.method,
                    request.path
                );
                Err(ApiError::Renewal(failure))
            }
            Recovery::Owner(rx) => {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move { inner.run_episode().await });
                settle(rx).await
            }
            Recovery::Queued(rx) => {
                tracing::debug!(
                    "Renewal in progress, queued {} {}",
                    request.method,
                    request.path
                );
                settle(rx).await
            }
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.inner.state.lock().phase, RefreshState::Refreshing(_))
    }

    /// Requests parked on the current renewal.
    pub fn pending(&self) -> usize {
        match &self.inner.state.lock().phase {
            RefreshState::Refreshing(queue) => queue.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Renewal calls started over the coordinator's lifetime.
    pub fn renewals(&self) -> u64 {
        self.inner.renewals.load(Ordering::Relaxed)
    }

    /// Renewals settled over the coordinator's lifetime.
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }
}

impl Inner {
    async fn run_episode(&self) {
        let episode = self.renewals.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!("Session expired, renewing (episode {})", episode);

        let result = self.call_refresh().await;

        // The store is written before the state leaves Refreshing and outside
        // the lock: 401s arriving meanwhile still queue on this episode.
        match &result {
            Ok(token) => {
                tracing::info!("Session renewed");
                self.store.set(token.clone());
            }
            Err(e) => {
                tracing::warn!("Session renewal failed: {}", e);
                self.store.clear();
            }
        }

        let queue = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.last_failure = result.as_ref().err().cloned();
            match std::mem::replace(&mut state.phase, RefreshState::Idle) {
                RefreshState::Refreshing(queue) => queue,
                RefreshState::Idle => RetryQueue::new(),
            }
        };

        let outcome = match result {
            Ok(token) => DrainOutcome::Replay(token),
            Err(e) => DrainOutcome::Reject(ApiError::Renewal(e)),
        };
        tracing::debug!("Draining {} request(s) after renewal", queue.len());
        queue
            .drain_with(outcome, |request, token| self.replay(request, token))
            .await;
    }

    async fn call_refresh(&self) -> Result<Token, RenewalError> {
        let request = RequestDescriptor::post(self.refresh_path.clone());
        let resp = self
            .transport
            .execute(&request)
            .await
            .map_err(|e| RenewalError::Network(e.to_string()))?;

        if !resp.status.is_success() {
            return Err(RenewalError::Http {
                status: resp.status.as_u16(),
                body: resp.text(),
            });
        }

        let reply: SessionReply = resp.json().map_err(|_| RenewalError::NoToken)?;
        reply.into_token().ok_or(RenewalError::NoToken)
    }

    async fn replay(&self, mut request: RequestDescriptor, token: Token) -> ApiResult<ApiResponse> {
        request.retried = true;
        let request = self.signer.sign(request, Some(&token));
        tracing::debug!("Replaying {} {}", request.method, request.path);
        classify(self.transport.execute(&request).await, true)
    }
}

fn park(
    queue: &mut RetryQueue,
    request: RequestDescriptor,
) -> oneshot::Receiver<ApiResult<ApiResponse>> {
    let (pending, rx) = PendingRequest::new(request);
    if let Err(pending) = queue.enqueue(pending) {
        pending.resolve(Err(exhausted()));
    }
    rx
}

async fn settle(rx: oneshot::Receiver<ApiResult<ApiResponse>>) -> ApiResult<ApiResponse> {
    rx.await.unwrap_or_else(|_| {
        Err(ApiError::Network(
            "session renewal ended without settling the request".into(),
        ))
    })
}

fn exhausted() -> ApiError {
    ApiError::Auth {
        kind: AuthFailure::Exhausted,
        status: 401,
        body: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::{OnceLock, Weak};

    use super::*;
    use crate::api::testing::{MockBackend, RefreshBehavior};
    use crate::auth::{MemoryTokenStore, StoredToken};

    /// Records what the coordinator state looked like at each write.
    #[derive(Default)]
    struct WatchedStore {
        tokens: MemoryTokenStore,
        coordinator: OnceLock<Weak<Inner>>,
        wrote_under_lock: AtomicBool,
        wrote_while_refreshing: AtomicBool,
    }

    impl WatchedStore {
        fn note_write(&self) {
            let Some(inner) = self.coordinator.get().and_then(Weak::upgrade) else {
                return;
            };
            match inner.state.try_lock() {
                Some(state) => {
                    if matches!(state.phase, RefreshState::Refreshing(_)) {
                        self.wrote_while_refreshing.store(true, Ordering::SeqCst);
                    }
                }
                None => self.wrote_under_lock.store(true, Ordering::SeqCst),
            };
        }
    }

    impl TokenStore for WatchedStore {
        fn get(&self) -> Option<Token> {
            self.tokens.get()
        }

        fn set(&self, token: Token) {
            self.note_write();
            self.tokens.set(token);
        }

        fn clear(&self) {
            self.note_write();
            self.tokens.clear();
        }

        fn stored(&self) -> Option<StoredToken> {
            self.tokens.stored()
        }
    }

    fn watched(behavior: RefreshBehavior) -> (RefreshCoordinator, Arc<WatchedStore>) {
        let backend = MockBackend::new(behavior);
        let store = Arc::new(WatchedStore::default());
        store.tokens.set(Token::new("T1"));
        let coordinator =
            RefreshCoordinator::new(store.clone(), backend, RequestSigner::default(), "/refresh");
        let _ = store.coordinator.set(Arc::downgrade(&coordinator.inner));
        (coordinator, store)
    }

    #[tokio::test]
    async fn test_store_written_outside_lock_while_still_refreshing() {
        for behavior in [
            RefreshBehavior::Grant("T2".into()),
            RefreshBehavior::Fail(500),
        ] {
            let (coordinator, store) = watched(behavior);

            let signed = coordinator.signing_state();
            let _ = coordinator
                .recover(RequestDescriptor::get("/cart"), signed)
                .await;

            assert!(!store.wrote_under_lock.load(Ordering::SeqCst));
            assert!(store.wrote_while_refreshing.load(Ordering::SeqCst));
            assert_eq!(coordinator.generation(), 1);
            assert!(!coordinator.is_refreshing());
        }
    }

    #[tokio::test]
    async fn test_signing_state_tracks_settled_renewals() {
        let (coordinator, _) = watched(RefreshBehavior::Grant("T2".into()));

        let before = coordinator.signing_state();
        assert_eq!(before.token, Some(Token::new("T1")));
        assert_eq!(before.generation, 0);

        let resp = coordinator
            .recover(RequestDescriptor::get("/cart"), before)
            .await
            .unwrap();
        assert_eq!(resp.text(), "/cart");

        let after = coordinator.signing_state();
        assert_eq!(after.token, Some(Token::new("T2")));
        assert_eq!(after.generation, 1);
        assert_eq!(coordinator.renewals(), 1);
    }

    #[tokio::test]
    async fn test_retried_request_is_exhausted() {
        let (coordinator, _) = watched(RefreshBehavior::Grant("T2".into()));

        let mut request = RequestDescriptor::get("/cart");
        request.retried = true;
        let signed = coordinator.signing_state();
        let err = coordinator.recover(request, signed).await.unwrap_err();

        assert!(matches!(
            err,
            ApiError::Auth {
                kind: AuthFailure::Exhausted,
                ..
            }
        ));
        assert_eq!(coordinator.renewals(), 0);
    }
}
