//! On-disk cache storage.
//!
//! Each generation gets its own directory under the storage root:
//!
//! ```text
//! {root}/{generation}/
//!   entries.json          # index: keys, status, headers, body digest
//!   bodies/{sha256}.bin   # response bodies, content-addressed
//! ```
//!
//! A batch writes its bodies first and then swaps in the new index with a
//! temp-file rename. Until the rename lands the old index is the one that
//! counts, so a failed batch leaves the previous contents intact. Bodies no
//! longer referenced by the index are removed after the swap.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::models::{CacheKey, HttpResponse, RequestDescriptor};

use super::{key_for_put, CacheStorage, CacheStore};

const ENTRIES_FILE: &str = "entries.json";
const ENTRIES_TMP_FILE: &str = "entries.json.tmp";
const BODIES_DIR: &str = "bodies";

/// Index record for one stored response. The body lives in
/// `bodies/{body_digest}.bin`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: CacheKey,
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub body_digest: String,
    pub body_len: u64,
    pub cached_at: DateTime<Utc>,
}

impl StoredEntry {
    /// Time since the entry was written. Never negative.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.cached_at).max(Duration::zero())
    }

    /// Age in its largest whole unit: `42s`, `5m`, `3h`, `2d`.
    pub fn age_display(&self) -> String {
        format_age(self.age())
    }
}

fn format_age(age: Duration) -> String {
    let secs = age.num_seconds();
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3_600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3_600),
        s => format!("{}d", s / 86_400),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    generation: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    entries: Vec<StoredEntry>,
}

/// Directory name for a generation. Anything outside `[A-Za-z0-9._-]`
/// becomes `_`, and a leading dot is escaped.
fn dir_name(generation: &str) -> String {
    let mut name: String = generation
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.starts_with('.') {
        name.insert(0, '_');
    }
    name
}

fn body_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

fn body_path(dir: &Path, digest: &str) -> PathBuf {
    dir.join(BODIES_DIR).join(format!("{}.bin", digest))
}

async fn read_store_file(path: &Path) -> Result<Option<StoreFile>, CacheError> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_store_file(dir: &Path, file: &StoreFile) -> Result<(), CacheError> {
    let tmp = dir.join(ENTRIES_TMP_FILE);
    let contents = serde_json::to_string_pretty(file)?;
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, dir.join(ENTRIES_FILE)).await?;
    Ok(())
}

async fn write_body(dir: &Path, digest: &str, body: &[u8]) -> Result<(), CacheError> {
    let path = body_path(dir, digest);
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, body).await?;
    fs::rename(&tmp, &path).await?;
    Ok(())
}

/// Delete body files the index no longer points at.
async fn remove_unreferenced_bodies(dir: &Path, file: &StoreFile) -> Result<(), CacheError> {
    let live: HashSet<String> = file
        .entries
        .iter()
        .map(|e| format!("{}.bin", e.body_digest))
        .collect();

    let mut bodies = fs::read_dir(dir.join(BODIES_DIR)).await?;
    while let Some(entry) = bodies.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !live.contains(&name) {
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

pub struct DiskCacheStorage {
    root: PathBuf,
    // One write lock per generation, shared by every handle to it
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DiskCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, name: &str) -> PathBuf {
        self.root.join(dir_name(name))
    }

    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Index entries of a generation, or `None` when the generation does
    /// not exist.
    pub async fn entries(&self, name: &str) -> Result<Option<Vec<StoredEntry>>, CacheError> {
        let path = self.generation_dir(name).join(ENTRIES_FILE);
        Ok(read_store_file(&path)
            .await?
            .filter(|f| f.generation == name)
            .map(|f| f.entries))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>, CacheError> {
        let dir = self.generation_dir(name);
        let lock = self.lock_for(name).await;
        let _guard = lock.lock().await;

        let store_err = |reason: String| CacheError::StoreOpen {
            name: name.to_string(),
            reason,
        };

        match read_store_file(&dir.join(ENTRIES_FILE)).await {
            Ok(Some(existing)) if existing.generation != name => {
                return Err(store_err(format!(
                    "directory {} belongs to generation '{}'",
                    dir.display(),
                    existing.generation
                )));
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                fs::create_dir_all(dir.join(BODIES_DIR))
                    .await
                    .map_err(|e| store_err(e.to_string()))?;
                let file = StoreFile {
                    generation: name.to_string(),
                    created_at: Utc::now(),
                    entries: Vec::new(),
                };
                write_store_file(&dir, &file)
                    .await
                    .map_err(|e| store_err(e.to_string()))?;
                debug!(generation = name, dir = %dir.display(), "Created cache directory");
            }
            Err(e) => return Err(store_err(e.to_string())),
        }

        Ok(Arc::new(DiskCacheStore {
            name: name.to_string(),
            dir,
            lock: lock.clone(),
        }))
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.entries(name).await?.is_some())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        if !self.has(name).await? {
            return Ok(false);
        }
        let lock = self.lock_for(name).await;
        let _guard = lock.lock().await;
        fs::remove_dir_all(self.generation_dir(name)).await?;
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut found = Vec::new();
        let mut dirs = fs::read_dir(&self.root).await?;
        while let Some(entry) = dirs.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match read_store_file(&entry.path().join(ENTRIES_FILE)).await {
                Ok(Some(file)) => found.push((file.created_at, file.generation)),
                Ok(None) => {}
                Err(e) => {
                    debug!(dir = %entry.path().display(), error = %e, "Skipping unreadable cache directory")
                }
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, name)| name).collect())
    }
}

pub struct DiskCacheStore {
    name: String,
    dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl DiskCacheStore {
    async fn load(&self) -> Result<StoreFile, CacheError> {
        read_store_file(&self.dir.join(ENTRIES_FILE))
            .await?
            .ok_or_else(|| CacheError::StoreOpen {
                name: self.name.clone(),
                reason: "cache was deleted".to_string(),
            })
    }
}

#[async_trait]
impl CacheStore for DiskCacheStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_all(&self, entries: Vec<(RequestDescriptor, HttpResponse)>) -> Result<(), CacheError> {
        let keyed = entries
            .into_iter()
            .map(|(request, response)| Ok((key_for_put(&request)?, response)))
            .collect::<Result<Vec<_>, CacheError>>()?;

        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        fs::create_dir_all(self.dir.join(BODIES_DIR)).await?;

        for (key, response) in keyed {
            let digest = body_digest(&response.body);
            write_body(&self.dir, &digest, &response.body).await?;

            file.entries.retain(|e| e.key != key);
            file.entries.push(StoredEntry {
                key,
                url: response.url,
                status: response.status,
                headers: response.headers,
                body_digest: digest,
                body_len: response.body.len() as u64,
                cached_at: Utc::now(),
            });
        }
        write_store_file(&self.dir, &file).await?;

        // The new index is already in place; leftovers only cost disk space
        if let Err(e) = remove_unreferenced_bodies(&self.dir, &file).await {
            warn!(generation = %self.name, error = %e, "Could not remove stale bodies");
        }
        Ok(())
    }

    async fn lookup(&self, request: &RequestDescriptor) -> Result<Option<HttpResponse>, CacheError> {
        let Some(key) = CacheKey::for_request(request) else {
            return Ok(None);
        };
        let file = self.load().await?;
        let Some(entry) = file.entries.into_iter().find(|e| e.key == key) else {
            return Ok(None);
        };

        let body = fs::read(body_path(&self.dir, &entry.body_digest)).await?;
        Ok(Some(HttpResponse {
            url: entry.url,
            status: entry.status,
            headers: entry.headers,
            body,
        }))
    }

    async fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        Ok(self.load().await?.entries.into_iter().map(|e| e.key).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (DiskCacheStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(temp_dir.path().join("caches")).unwrap();
        (storage, temp_dir)
    }

    fn body_files(storage: &DiskCacheStorage, name: &str) -> usize {
        std::fs::read_dir(storage.generation_dir(name).join(BODIES_DIR))
            .unwrap()
            .count()
    }

    #[test]
    fn test_dir_name_sanitizes() {
        assert_eq!(dir_name("uhoues-v1.0"), "uhoues-v1.0");
        assert_eq!(dir_name("a/b c"), "a_b_c");
        assert_eq!(dir_name(".."), "_..");
    }

    #[test]
    fn test_format_age_units() {
        assert_eq!(format_age(Duration::seconds(0)), "0s");
        assert_eq!(format_age(Duration::seconds(59)), "59s");
        assert_eq!(format_age(Duration::minutes(5)), "5m");
        assert_eq!(format_age(Duration::minutes(119)), "1h");
        assert_eq!(format_age(Duration::hours(49)), "2d");
    }

    #[tokio::test]
    async fn test_put_and_lookup_survive_reopen() {
        let (storage, temp_dir) = create_test_storage();
        let store = storage.open("v1").await.unwrap();
        store
            .put(
                RequestDescriptor::get("https://example.com/"),
                HttpResponse::new("https://example.com/", 200, "home").with_header("content-type", "text/html"),
            )
            .await
            .unwrap();

        let reopened = DiskCacheStorage::new(temp_dir.path().join("caches")).unwrap();
        let store = reopened.open("v1").await.unwrap();
        let found = store
            .lookup(&RequestDescriptor::get("https://example.com/"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.body, b"home");
        assert_eq!(found.header("content-type"), Some("text/html"));
    }

    #[tokio::test]
    async fn test_index_does_not_embed_bodies() {
        let (storage, _temp_dir) = create_test_storage();
        let store = storage.open("v1").await.unwrap();
        let icon = vec![0xAB_u8; 64 * 1024];
        store
            .put(RequestDescriptor::get("/icon.png"), HttpResponse::new("/icon.png", 200, icon.clone()))
            .await
            .unwrap();

        let index_len = std::fs::metadata(storage.generation_dir("v1").join(ENTRIES_FILE))
            .unwrap()
            .len();
        assert!(index_len < 1024, "index is {} bytes", index_len);

        let stored = std::fs::read(body_path(&storage.generation_dir("v1"), &body_digest(&icon))).unwrap();
        assert_eq!(stored, icon);

        let entries = storage.entries("v1").await.unwrap().unwrap();
        assert_eq!(entries[0].body_len, icon.len() as u64);
    }

    #[tokio::test]
    async fn test_replaced_bodies_are_removed() {
        let (storage, _temp_dir) = create_test_storage();
        let store = storage.open("v1").await.unwrap();
        store
            .put(RequestDescriptor::get("/"), HttpResponse::new("/", 200, "old"))
            .await
            .unwrap();
        store
            .put(RequestDescriptor::get("/"), HttpResponse::new("/", 200, "new"))
            .await
            .unwrap();

        assert_eq!(body_files(&storage, "v1"), 1);
        let found = store.lookup(&RequestDescriptor::get("/")).await.unwrap().unwrap();
        assert_eq!(found.body, b"new");
    }

    #[tokio::test]
    async fn test_identical_bodies_share_a_file() {
        let (storage, _temp_dir) = create_test_storage();
        let store = storage.open("v1").await.unwrap();
        store
            .put_all(vec![
                (RequestDescriptor::get("/a"), HttpResponse::new("/a", 200, "same")),
                (RequestDescriptor::get("/b"), HttpResponse::new("/b", 200, "same")),
            ])
            .await
            .unwrap();

        assert_eq!(store.keys().await.unwrap().len(), 2);
        assert_eq!(body_files(&storage, "v1"), 1);
    }

    #[tokio::test]
    async fn test_query_strings_are_distinct_keys() {
        let (storage, _temp_dir) = create_test_storage();
        let store = storage.open("v1").await.unwrap();
        store
            .put(RequestDescriptor::get("/a?x=1"), HttpResponse::new("/a?x=1", 200, "one"))
            .await
            .unwrap();

        assert!(store.lookup(&RequestDescriptor::get("/a?x=1")).await.unwrap().is_some());
        assert!(store.lookup(&RequestDescriptor::get("/a?x=2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reinsert_does_not_duplicate() {
        let (storage, _temp_dir) = create_test_storage();
        let store = storage.open("v1").await.unwrap();
        for _ in 0..2 {
            store
                .put_all(vec![
                    (RequestDescriptor::get("/"), HttpResponse::new("/", 200, "home")),
                    (RequestDescriptor::get("/logo.png"), HttpResponse::new("/logo.png", 200, "png")),
                ])
                .await
                .unwrap();
        }
        assert_eq!(store.keys().await.unwrap().len(), 2);
        assert_eq!(body_files(&storage, "v1"), 2);
    }

    #[tokio::test]
    async fn test_generations_listed_and_deleted() {
        let (storage, _temp_dir) = create_test_storage();
        storage.open("uhoues-v1").await.unwrap();
        storage.open("uhoues-v1.0").await.unwrap();

        let keys = storage.keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"uhoues-v1".to_string()));
        assert!(keys.contains(&"uhoues-v1.0".to_string()));

        assert!(storage.delete("uhoues-v1").await.unwrap());
        assert!(!storage.has("uhoues-v1").await.unwrap());
        assert!(storage.has("uhoues-v1.0").await.unwrap());
        assert!(!storage.delete("uhoues-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_rejects_colliding_directory() {
        let (storage, _temp_dir) = create_test_storage();
        storage.open("a/b").await.unwrap();
        let err = storage.open("a_b").await.err().unwrap();
        assert!(matches!(err, CacheError::StoreOpen { .. }));
    }

    #[tokio::test]
    async fn test_entries_reports_ages() {
        let (storage, _temp_dir) = create_test_storage();
        assert!(storage.entries("v1").await.unwrap().is_none());

        let store = storage.open("v1").await.unwrap();
        store
            .put(RequestDescriptor::get("/"), HttpResponse::new("/", 200, "home"))
            .await
            .unwrap();

        let mut entries = storage.entries("v1").await.unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].age_display().ends_with('s'));

        entries[0].cached_at = Utc::now() - Duration::minutes(90);
        assert_eq!(entries[0].age_display(), "1h");

        // Clock skew never yields a negative age
        entries[0].cached_at = Utc::now() + Duration::minutes(5);
        assert_eq!(entries[0].age_display(), "0s");
    }
}
