//! Storefront API client
//!
//! Authenticated HTTP access to the storefront backend with transparent,
//! single-flight session renewal.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiError, ApiResponse, ApiResult, Client, RequestDescriptor};
pub use auth::{Credentials, FileTokenStore, MemoryTokenStore, Token, TokenStore};
pub use config::Config;
