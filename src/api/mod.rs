//! Authenticated client for the storefront API
//!
//! Requests flow through an explicit chain: [`RequestSigner`] attaches the
//! session token, a [`Transport`] executes the request, [`classify`] maps the
//! outcome to a response or an [`ApiError`]. A first 401 is handed to the
//! [`RefreshCoordinator`], which renews the session once per failure wave and
//! replays everything that failed meanwhile.

pub mod classify;
pub mod client;
pub mod error;
pub mod queue;
pub mod refresh;
pub mod request;
pub mod signer;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::classify;
pub use client::Client;
pub use error::{ApiError, ApiResult, AuthFailure, RenewalError};
pub use queue::{DrainOutcome, PendingRequest, RetryQueue};
pub use refresh::{RefreshCoordinator, SignedWith};
pub use request::{ApiResponse, RequestDescriptor};
pub use signer::RequestSigner;
pub use transport::{ReqwestTransport, Transport, TransportError};
