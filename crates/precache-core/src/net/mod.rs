//! Network capability.
//!
//! The interceptor never talks to reqwest directly; it goes through the
//! [`Fetcher`] trait so tests can count and script network calls.

pub mod http;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::{HttpResponse, RequestDescriptor};

pub use http::HttpFetcher;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Send one request. Non-2xx statuses come back as `Ok`.
    async fn fetch(&self, request: &RequestDescriptor) -> Result<HttpResponse, FetchError>;
}
