use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CacheError;
use crate::models::{CacheKey, HttpResponse, RequestDescriptor};

use super::{key_for_put, CacheStorage, CacheStore};

/// In-memory cache storage. Contents live as long as the value does.
#[derive(Default)]
pub struct MemoryCacheStorage {
    // Kept in creation order
    caches: RwLock<Vec<Arc<MemoryCacheStore>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>, CacheError> {
        let mut caches = self.caches.write().await;
        if let Some(existing) = caches.iter().find(|c| c.name == name) {
            return Ok(existing.clone());
        }
        let store = Arc::new(MemoryCacheStore::new(name));
        caches.push(store.clone());
        Ok(store)
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.read().await.iter().any(|c| c.name == name))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut caches = self.caches.write().await;
        let before = caches.len();
        caches.retain(|c| c.name != name);
        Ok(caches.len() != before)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.caches.read().await.iter().map(|c| c.name.clone()).collect())
    }
}

pub struct MemoryCacheStore {
    name: String,
    entries: RwLock<BTreeMap<CacheKey, HttpResponse>>,
}

impl MemoryCacheStore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_all(&self, entries: Vec<(RequestDescriptor, HttpResponse)>) -> Result<(), CacheError> {
        // Validate the whole batch before touching the map
        let keyed = entries
            .into_iter()
            .map(|(request, response)| Ok((key_for_put(&request)?, response)))
            .collect::<Result<Vec<_>, CacheError>>()?;

        self.entries.write().await.extend(keyed);
        Ok(())
    }

    async fn lookup(&self, request: &RequestDescriptor) -> Result<Option<HttpResponse>, CacheError> {
        let Some(key) = CacheKey::for_request(request) else {
            return Ok(None);
        };
        Ok(self.entries.read().await.get(&key).cloned())
    }

    async fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}
