//! Holding area for requests waiting on a session renewal.

use std::collections::VecDeque;
use std::future::Future;

use futures::future::join_all;
use tokio::sync::oneshot;

use super::error::{ApiError, ApiResult};
use super::request::{ApiResponse, RequestDescriptor};
use crate::auth::Token;

/// One caller blocked on a renewal.
#[derive(Debug)]
pub struct PendingRequest {
    pub request: RequestDescriptor,
    responder: oneshot::Sender<ApiResult<ApiResponse>>,
}

impl PendingRequest {
    /// Pair a request with the receiver its caller awaits.
    pub fn new(request: RequestDescriptor) -> (Self, oneshot::Receiver<ApiResult<ApiResponse>>) {
        let (responder, rx) = oneshot::channel();
        (Self { request, responder }, rx)
    }

    pub fn resolve(self, result: ApiResult<ApiResponse>) {
        if self.responder.send(result).is_err() {
            tracing::debug!("Caller for {} {} went away", self.request.method, self.request.path);
        }
    }
}

/// How a renewal episode settled.
#[derive(Debug, Clone)]
pub enum DrainOutcome {
    /// Replay every queued request with the new token.
    Replay(Token),
    /// Fail every queued request with the renewal error.
    Reject(ApiError),
}

/// FIFO of [`PendingRequest`]s for one renewal episode.
///
/// Draining consumes the queue, so once it has been taken out of the
/// coordinator state nothing can be added to it.
#[derive(Debug, Default)]
pub struct RetryQueue {
    pending: VecDeque<PendingRequest>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request. Requests that were already replayed once are handed back.
    pub fn enqueue(&mut self, pending: PendingRequest) -> Result<(), PendingRequest> {
        if pending.request.retried {
            return Err(pending);
        }
        self.pending.push_back(pending);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Resolve every queued caller in arrival order.
    ///
    /// On `Replay`, `replay` is called for each request in FIFO order; the
    /// resulting futures are polled in that order and then run concurrently,
    /// each caller being answered as soon as its own replay completes.
    pub async fn drain_with<F, Fut>(self, outcome: DrainOutcome, replay: F)
    where
        F: Fn(RequestDescriptor, Token) -> Fut,
        Fut: Future<Output = ApiResult<ApiResponse>>,
    {
        match outcome {
            DrainOutcome::Reject(err) => {
                for pending in self.pending {
                    pending.resolve(Err(err.clone()));
                }
            }
            DrainOutcome::Replay(token) => {
                let replays = self.pending.into_iter().map(|pending| {
                    let PendingRequest { request, responder } = pending;
                    let fut = replay(request.clone(), token.clone());
                    async move {
                        let result = fut.await;
                        PendingRequest { request, responder }.resolve(result);
                    }
                });
                join_all(replays).await;
            }
        }
    }
}
