//! End-to-end install and interception against a mock origin and an
//! on-disk store.

use std::sync::Arc;

use precache_core::{
    CacheError, CacheFetchInterceptor, CacheGeneration, CacheStorage, DiskCacheStorage,
    HttpFetcher, LifecycleEvent, LifecycleState, Manifest, RequestDescriptor, ResponseSource, WorkerHost,
};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_site(mock_server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>home</html>"))
        .expect(1)
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
        .expect(1)
        .mount(mock_server)
        .await;
}

fn interceptor(
    generation: &str,
    urls: &[&str],
    storage: Arc<DiskCacheStorage>,
    origin: &str,
) -> CacheFetchInterceptor {
    CacheFetchInterceptor::new(
        CacheGeneration::new(generation).unwrap(),
        Manifest::new(urls.iter().copied()).unwrap(),
        storage,
        Arc::new(HttpFetcher::new().unwrap()),
    )
    .with_origin(Url::parse(origin).unwrap())
}

#[tokio::test]
async fn test_install_then_serve_offline() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(DiskCacheStorage::new(temp_dir.path()).unwrap());
    let host = WorkerHost::register(interceptor(
        "v1",
        &["/", "/logo.png"],
        storage.clone(),
        &mock_server.uri(),
    ));

    let report = host.start().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.cached.len(), 2);

    // Both manifest URLs are answered from disk; the origin sees one hit each
    // from install only.
    for url in ["/", "/logo.png", "/"] {
        let result = host
            .respond_with(RequestDescriptor::get(url))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.source, ResponseSource::Cache);
    }

    let miss = host.interceptor().intercept(&RequestDescriptor::get("/missing")).await.unwrap();
    assert_eq!(miss.source, ResponseSource::Network);
    assert_eq!(miss.response.status, 404);

    let entries = storage.entries("v1").await.unwrap().unwrap();
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn test_unreachable_manifest_entry_fails_install() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("home"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(DiskCacheStorage::new(temp_dir.path()).unwrap());
    let host = WorkerHost::register(interceptor(
        "v1",
        &["/", "/logo.png"],
        storage.clone(),
        &mock_server.uri(),
    ));

    let err = host.start().await.unwrap_err();
    assert!(matches!(err, CacheError::BadStatus { status: 503, .. }));
    assert_eq!(host.interceptor().state().await, LifecycleState::Uninitialized);

    // Nothing is left behind for a later resume to pick up
    assert!(!storage.has("v1").await.unwrap());
    assert!(storage.keys().await.unwrap().is_empty());
    assert!(!host.interceptor().resume().await.unwrap());
}

#[tokio::test]
async fn test_new_generation_leaves_old_until_purged() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("page"))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(DiskCacheStorage::new(temp_dir.path()).unwrap());

    let old = WorkerHost::register(interceptor("uhoues-v1", &["/"], storage.clone(), &mock_server.uri()));
    old.start().await.unwrap();

    let new = WorkerHost::register(interceptor("uhoues-v1.0", &["/"], storage.clone(), &mock_server.uri()));
    new.start().await.unwrap();
    assert_eq!(storage.keys().await.unwrap().len(), 2);

    let removed = new.interceptor().purge_superseded().await.unwrap();
    assert_eq!(removed, vec!["uhoues-v1"]);
    assert_eq!(storage.keys().await.unwrap(), vec!["uhoues-v1.0"]);
}

#[tokio::test]
async fn test_restarted_worker_resumes_from_disk() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;

    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(DiskCacheStorage::new(temp_dir.path()).unwrap());
    interceptor("v1", &["/", "/logo.png"], storage.clone(), &mock_server.uri())
        .install()
        .await
        .unwrap();

    let reopened = Arc::new(DiskCacheStorage::new(temp_dir.path()).unwrap());
    let restarted = interceptor("v1", &["/", "/logo.png"], reopened, &mock_server.uri());
    assert!(restarted.resume().await.unwrap());

    let result = restarted.intercept(&RequestDescriptor::get("/logo.png")).await.unwrap();
    assert_eq!(result.source, ResponseSource::Cache);
    assert_eq!(result.response.body, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_failed_reinstall_keeps_offline_copy() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;

    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(DiskCacheStorage::new(temp_dir.path()).unwrap());
    let host = WorkerHost::register(interceptor(
        "v1",
        &["/", "/logo.png"],
        storage.clone(),
        &mock_server.uri(),
    ));
    host.start().await.unwrap();

    // Origin goes down
    mock_server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    assert!(host.dispatch(LifecycleEvent::Install).await.is_err());
    assert_eq!(host.interceptor().state().await, LifecycleState::Active);

    let result = host
        .respond_with(RequestDescriptor::get("/"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.source, ResponseSource::Cache);
    assert_eq!(result.response.body, b"<html>home</html>");
}
