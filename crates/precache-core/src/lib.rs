//! Core library for precache.
//!
//! A cache-first fetch interceptor: on install it prefetches a fixed
//! manifest of URLs into a named cache generation, and afterwards answers
//! each request from that generation when it can, falling back to the
//! network otherwise.
//!
//! The cache store and the network are injected capabilities
//! ([`store::CacheStorage`], [`net::Fetcher`]) so the interceptor can run
//! against an on-disk store and reqwest in production and against
//! in-memory fakes in tests.

pub mod config;
pub mod error;
pub mod host;
pub mod interceptor;
pub mod models;
pub mod net;
pub mod store;

pub use config::{Config, Preset};
pub use error::{CacheError, FetchError};
pub use host::{LifecycleEvent, WorkerHost};
pub use interceptor::{CacheFetchInterceptor, InstallMode, Intercepted, LifecycleState, ResponseSource};
pub use models::{CacheGeneration, CacheKey, HttpResponse, Manifest, RequestDescriptor};
pub use net::{Fetcher, HttpFetcher};
pub use store::{CacheStorage, CacheStore, DiskCacheStorage, InstallReport, MemoryCacheStorage};
