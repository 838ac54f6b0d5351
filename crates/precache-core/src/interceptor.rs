//! Cache-first fetch interceptor.
//!
//! [`CacheFetchInterceptor`] owns one cache generation and a manifest of URLs.
//! Its lifecycle is driven from outside:
//!
//! ```text
//! Uninitialized --install--> Installing --ok--> Installed --activate--> Active
//!                                |
//!                                +--err--> Uninitialized
//! ```
//!
//! Reinstalling an active component skips `Installing`: it stays active on
//! its existing store throughout, and keeps that store if the install fails.
//!
//! Once active, [`CacheFetchInterceptor::intercept`] answers each request from
//! the generation's store, or forwards it to the network on a miss. Network
//! results are never written back, so the store only ever holds what install
//! put there.
//!
//! Activation does not remove stores left behind by earlier generations.
//! That is [`CacheFetchInterceptor::purge_superseded`], which callers invoke
//! explicitly.

use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::CacheError;
use crate::models::{CacheGeneration, HttpResponse, Manifest, RequestDescriptor};
use crate::net::Fetcher;
use crate::store::{self, CacheStorage, CacheStore, InstallReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallMode {
    /// Every manifest URL is cached or the install fails with nothing stored.
    #[default]
    Atomic,
    /// Cache whatever can be fetched and report the rest.
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Installing,
    Installed,
    Active,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Active => "active",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseSource::Cache => f.write_str("cache"),
            ResponseSource::Network => f.write_str("network"),
        }
    }
}

/// A response together with where it came from.
#[derive(Debug, Clone)]
pub struct Intercepted {
    pub response: HttpResponse,
    pub source: ResponseSource,
}

struct Lifecycle {
    state: LifecycleState,
    store: Option<Arc<dyn CacheStore>>,
    // Set for the whole of an install, including a reinstall that leaves
    // `state` at Active
    installing: bool,
}

pub struct CacheFetchInterceptor {
    generation: CacheGeneration,
    manifest: Manifest,
    origin: Option<Url>,
    install_mode: InstallMode,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    lifecycle: RwLock<Lifecycle>,
}

impl CacheFetchInterceptor {
    pub fn new(
        generation: CacheGeneration,
        manifest: Manifest,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            generation,
            manifest,
            origin: None,
            install_mode: InstallMode::default(),
            storage,
            fetcher,
            lifecycle: RwLock::new(Lifecycle {
                state: LifecycleState::Uninitialized,
                store: None,
                installing: false,
            }),
        }
    }

    /// Resolve relative URLs (manifest entries and requests) against `origin`.
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_install_mode(mut self, mode: InstallMode) -> Self {
        self.install_mode = mode;
        self
    }

    pub fn generation(&self) -> &CacheGeneration {
        &self.generation
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.read().await.state
    }

    fn manifest_requests(&self) -> Result<Vec<RequestDescriptor>, CacheError> {
        self.manifest
            .urls()
            .iter()
            .map(|url| RequestDescriptor::get(url.as_str()).resolve(self.origin.as_ref()))
            .collect()
    }

    /// Open this generation's store and prefetch the manifest into it.
    ///
    /// Completes only once every manifest entry has been attempted. In
    /// [`InstallMode::Atomic`] any failure is returned and nothing is
    /// stored. A failed first install leaves the component uninitialized
    /// and removes the store it created.
    ///
    /// Reinstalling an active component keeps it active: requests are
    /// served from the existing store while the install runs, and a failed
    /// reinstall leaves that store in service.
    pub async fn install(&self) -> Result<InstallReport, CacheError> {
        let previous = {
            let mut lifecycle = self.lifecycle.write().await;
            if lifecycle.installing {
                return Err(CacheError::InvalidState {
                    action: "install",
                    state: LifecycleState::Installing.to_string(),
                });
            }
            lifecycle.installing = true;
            let previous = lifecycle.state;
            if previous != LifecycleState::Active {
                lifecycle.state = LifecycleState::Installing;
            }
            previous
        };

        info!(generation = %self.generation, urls = self.manifest.len(), "Installing");

        let result = self.run_install().await;

        let mut lifecycle = self.lifecycle.write().await;
        lifecycle.installing = false;
        match result {
            Ok((cache, report)) => {
                lifecycle.state = if previous == LifecycleState::Active {
                    LifecycleState::Active
                } else {
                    LifecycleState::Installed
                };
                lifecycle.store = Some(cache);
                info!(
                    generation = %self.generation,
                    cached = report.cached.len(),
                    failed = report.failed.len(),
                    "Install complete"
                );
                Ok(report)
            }
            Err(e) => {
                // The previous store, if any, was not written to
                lifecycle.state = previous;
                warn!(generation = %self.generation, state = %previous, error = %e, "Install failed");
                Err(e)
            }
        }
    }

    async fn run_install(&self) -> Result<(Arc<dyn CacheStore>, InstallReport), CacheError> {
        let requests = self.manifest_requests()?;

        let name = self.generation.as_str();
        let existed = self.storage.has(name).await?;
        let cache = self.storage.open(name).await?;
        info!(generation = %self.generation, "Cache opened");

        let report = match self.install_mode {
            InstallMode::Atomic => {
                if let Err(e) = store::add_all(cache.as_ref(), self.fetcher.as_ref(), &requests).await {
                    if !existed {
                        self.discard_store(name).await;
                    }
                    return Err(e);
                }
                InstallReport {
                    generation: self.generation.to_string(),
                    cached: store::unique_requests(&requests)?
                        .into_iter()
                        .map(|r| r.url)
                        .collect(),
                    failed: Vec::new(),
                }
            }
            InstallMode::BestEffort => {
                store::add_each(cache.as_ref(), self.fetcher.as_ref(), &requests).await?
            }
        };
        Ok((cache, report))
    }

    /// Remove a store this install created, so a failed install cannot be
    /// resumed later.
    async fn discard_store(&self, name: &str) {
        match self.storage.delete(name).await {
            Ok(_) => debug!(generation = name, "Discarded store from failed install"),
            Err(e) => warn!(generation = name, error = %e, "Could not discard store from failed install"),
        }
    }

    /// Take over request handling. Only logs; stores from earlier
    /// generations are left in place.
    pub async fn activate(&self) -> Result<(), CacheError> {
        let mut lifecycle = self.lifecycle.write().await;
        match lifecycle.state {
            LifecycleState::Installed | LifecycleState::Active => {
                lifecycle.state = LifecycleState::Active;
                info!(generation = %self.generation, "Activated");
                Ok(())
            }
            state => Err(CacheError::InvalidState {
                action: "activate",
                state: state.to_string(),
            }),
        }
    }

    /// Become active without installing if this generation's store already
    /// exists, as when a previously installed worker is restarted.
    ///
    /// Returns `false` (and changes nothing) when there is no such store.
    pub async fn resume(&self) -> Result<bool, CacheError> {
        if !self.storage.has(self.generation.as_str()).await? {
            debug!(generation = %self.generation, "Nothing to resume");
            return Ok(false);
        }
        let cache = self.storage.open(self.generation.as_str()).await?;

        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.installing {
            return Err(CacheError::InvalidState {
                action: "resume",
                state: lifecycle.state.to_string(),
            });
        }
        lifecycle.state = LifecycleState::Active;
        lifecycle.store = Some(cache);
        info!(generation = %self.generation, "Resumed");
        Ok(true)
    }

    /// Answer one request: the stored response if there is one, otherwise
    /// whatever a single network fetch produces, success or failure.
    ///
    /// Before activation every request goes straight to the network.
    pub async fn intercept(&self, request: &RequestDescriptor) -> Result<Intercepted, CacheError> {
        let request = request.resolve(self.origin.as_ref())?;

        let cache = {
            let lifecycle = self.lifecycle.read().await;
            match lifecycle.state {
                LifecycleState::Active => lifecycle.store.clone(),
                _ => None,
            }
        };

        if let Some(cache) = cache {
            if let Some(response) = cache.lookup(&request).await? {
                info!(url = %request.url, "Serving from cache");
                return Ok(Intercepted {
                    response,
                    source: ResponseSource::Cache,
                });
            }
        } else {
            debug!(url = %request.url, "Not active, bypassing cache");
        }

        info!(url = %request.url, "Fetching from network");
        let response = self.fetcher.fetch(&request).await?;
        Ok(Intercepted {
            response,
            source: ResponseSource::Network,
        })
    }

    /// Delete every store other than this generation's. Returns the names
    /// removed.
    pub async fn purge_superseded(&self) -> Result<Vec<String>, CacheError> {
        let mut removed = Vec::new();
        for name in self.storage.keys().await? {
            if name == self.generation.as_str() {
                continue;
            }
            if self.storage.delete(&name).await? {
                info!(generation = %name, "Deleted superseded cache");
                removed.push(name);
            }
        }
        Ok(removed)
    }
}
