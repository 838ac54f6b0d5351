//! Named cache stores.
//!
//! A [`CacheStorage`] holds any number of named stores, one per cache
//! generation. Each [`CacheStore`] maps a GET request to a stored response.
//! Two backends are provided:
//! - [`MemoryCacheStorage`] - process-local, used by tests and embedders
//! - [`DiskCacheStorage`] - one directory per generation: a JSON index plus
//!   content-addressed body files
//!
//! [`add_all`] and [`add_each`] are the install-time batch primitives that
//! fetch a list of requests and insert the results.

pub mod disk;
pub mod memory;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::models::{CacheKey, HttpResponse, RequestDescriptor};
use crate::net::Fetcher;

pub use disk::{DiskCacheStorage, DiskCacheStore, StoredEntry};
pub use memory::{MemoryCacheStorage, MemoryCacheStore};

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open the store called `name`, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>, CacheError>;

    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Delete a store and all its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Names of all stores, oldest first.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &str;

    /// Insert every entry or none of them. An existing entry under the same
    /// key is replaced.
    async fn put_all(&self, entries: Vec<(RequestDescriptor, HttpResponse)>) -> Result<(), CacheError>;

    async fn put(&self, request: RequestDescriptor, response: HttpResponse) -> Result<(), CacheError> {
        self.put_all(vec![(request, response)]).await
    }

    /// Stored response for `request`. Non-GET requests never match.
    async fn lookup(&self, request: &RequestDescriptor) -> Result<Option<HttpResponse>, CacheError>;

    async fn keys(&self) -> Result<Vec<CacheKey>, CacheError>;
}

/// Key for an entry about to be written; only GET requests can be stored.
pub(crate) fn key_for_put(request: &RequestDescriptor) -> Result<CacheKey, CacheError> {
    CacheKey::for_request(request).ok_or_else(|| CacheError::UnsupportedMethod(request.method.clone()))
}

/// Outcome of an install pass over the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub generation: String,
    /// URLs now present in the store, in manifest order.
    pub cached: Vec<String>,
    /// URLs that could not be cached, with the reason.
    pub failed: Vec<(String, String)>,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drop repeated keys, keeping the first occurrence.
pub(crate) fn unique_requests(requests: &[RequestDescriptor]) -> Result<Vec<RequestDescriptor>, CacheError> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(requests.len());
    for request in requests {
        let key = key_for_put(request)?;
        if seen.insert(key) {
            unique.push(request.clone());
        } else {
            debug!(url = %request.url, "Skipping duplicate manifest entry");
        }
    }
    Ok(unique)
}

async fn fetch_for_cache(
    fetcher: &dyn Fetcher,
    request: &RequestDescriptor,
) -> Result<(RequestDescriptor, HttpResponse), CacheError> {
    let response = fetcher
        .fetch(request)
        .await
        .map_err(|source| CacheError::Fetch {
            url: request.url.clone(),
            source,
        })?;

    if !response.is_success() {
        return Err(CacheError::BadStatus {
            url: request.url.clone(),
            status: response.status,
        });
    }
    Ok((request.clone(), response))
}

/// Fetch every request and store the results as one batch.
///
/// Any transport failure or non-2xx status fails the whole batch and
/// nothing is written.
pub async fn add_all(
    store: &dyn CacheStore,
    fetcher: &dyn Fetcher,
    requests: &[RequestDescriptor],
) -> Result<(), CacheError> {
    let requests = unique_requests(requests)?;
    let entries = try_join_all(requests.iter().map(|r| fetch_for_cache(fetcher, r))).await?;
    store.put_all(entries).await
}

/// Fetch every request and store whichever succeed.
///
/// Per-URL failures are collected in the report instead of failing the
/// batch. A store write failure still fails the call.
pub async fn add_each(
    store: &dyn CacheStore,
    fetcher: &dyn Fetcher,
    requests: &[RequestDescriptor],
) -> Result<InstallReport, CacheError> {
    let requests = unique_requests(requests)?;
    let results = join_all(requests.iter().map(|r| fetch_for_cache(fetcher, r))).await;

    let mut report = InstallReport {
        generation: store.name().to_string(),
        ..Default::default()
    };
    let mut entries = Vec::new();
    for (request, result) in requests.iter().zip(results) {
        match result {
            Ok(entry) => {
                report.cached.push(request.url.clone());
                entries.push(entry);
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Could not prefetch manifest entry");
                report.failed.push((request.url.clone(), e.to_string()));
            }
        }
    }

    if !entries.is_empty() {
        store.put_all(entries).await?;
    }
    Ok(report)
}
