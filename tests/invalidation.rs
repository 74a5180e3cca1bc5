mod support;

use std::sync::Arc;
use std::time::Duration;

use vitrine::application::render::PageRequest;
use vitrine::cache::transport::LocalTransport;
use vitrine::cache::{
    CacheConfig, EventDispatcher, InvalidationListener, InvalidationTarget, MediaCache, MediaFetch,
    PageCache, PageKey, Theme,
};

use support::{CountingRenderer, MemoryObjectStore};

const WAIT: Duration = Duration::from_millis(100);

async fn warm(cache: &PageCache, root: &str, path: &str) {
    for theme in Theme::ALL {
        cache
            .serve(PageRequest::new(root, path, theme))
            .await
            .expect("render succeeds");
    }
}

fn page_cache() -> (Arc<CountingRenderer>, Arc<PageCache>) {
    let renderer = Arc::new(CountingRenderer::default());
    let cache = Arc::new(PageCache::new(renderer.clone(), true, WAIT));
    (renderer, cache)
}

fn dispatcher_for(targets: Vec<Arc<dyn InvalidationTarget>>) -> EventDispatcher {
    EventDispatcher::new(targets)
}

#[tokio::test]
async fn doc_update_removes_both_themes_of_named_paths_only() {
    let (renderer, pages) = page_cache();
    warm(&pages, "home", "/about").await;
    warm(&pages, "home", "/contact").await;
    warm(&pages, "home-fr", "/about").await;
    assert_eq!(pages.len(), 6);

    let target: Arc<dyn InvalidationTarget> = pages.clone();
    let dispatcher = dispatcher_for(vec![target]);
    let payload = br#"{"event":"on_doc_update","affectedContent":[{"root":"home","path":"/About/"}]}"#;
    assert!(dispatcher.dispatch_raw("test", payload).await);

    assert!(pages.cached(&PageKey::new("home", Theme::Light, "/about")).is_none());
    assert!(pages.cached(&PageKey::new("home", Theme::Dark, "/about")).is_none());
    assert!(pages.cached(&PageKey::new("home", Theme::Light, "/contact")).is_some());
    assert!(pages.cached(&PageKey::new("home-fr", Theme::Dark, "/about")).is_some());
    assert_eq!(pages.len(), 4);

    // Applying the same event again changes nothing.
    assert!(dispatcher.dispatch_raw("test", payload).await);
    assert_eq!(pages.len(), 4);

    warm(&pages, "home", "/about").await;
    assert_eq!(renderer.calls(), 8);
}

#[tokio::test]
async fn schema_change_clears_every_page() {
    let (_, pages) = page_cache();
    warm(&pages, "home", "/").await;
    warm(&pages, "home", "/about").await;

    let target: Arc<dyn InvalidationTarget> = pages.clone();
    let dispatcher = dispatcher_for(vec![target]);
    assert!(
        dispatcher
            .dispatch_raw("test", br#"{"Event":"on_xmlschema_change"}"#)
            .await
    );

    assert!(pages.is_empty());
}

#[tokio::test]
async fn media_and_unknown_events_leave_pages_alone() {
    let (_, pages) = page_cache();
    warm(&pages, "home", "/about").await;

    let target: Arc<dyn InvalidationTarget> = pages.clone();
    let dispatcher = dispatcher_for(vec![target]);
    for payload in [
        br#"{"event":"on_media_delete","affectedContent":[{"root":"home","path":"/about"}]}"#
            .as_slice(),
        br#"{"event":"on_something_new"}"#.as_slice(),
        br#"{"event":"on_doc_update","affectedContent":[]}"#.as_slice(),
    ] {
        assert!(dispatcher.dispatch_raw("test", payload).await);
    }

    assert_eq!(pages.len(), 2);
}

#[tokio::test]
async fn undecodable_payloads_are_dropped() {
    let (_, pages) = page_cache();
    warm(&pages, "home", "/about").await;

    let target: Arc<dyn InvalidationTarget> = pages.clone();
    let dispatcher = dispatcher_for(vec![target]);
    assert!(!dispatcher.dispatch_raw("test", b"").await);
    assert!(!dispatcher.dispatch_raw("test", b"{not json").await);
    assert_eq!(pages.len(), 2);
}

#[tokio::test]
async fn listener_routes_local_events_to_both_caches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = CacheConfig {
        media_cache_dir: dir.path().join("media"),
        media_file_types: vec![".jpg".into()],
        ..Default::default()
    };
    let store = Arc::new(MemoryObjectStore::default().with_object("images/cat.jpg", b"meow"));
    let media = Arc::new(MediaCache::new(store.clone(), &config));
    media.prepare().await.expect("prepare");

    let (_, pages) = page_cache();
    warm(&pages, "home", "/about").await;
    let cached = match media.fetch("/images/cat.jpg").await.expect("fetch") {
        MediaFetch::Cached(cached) => cached,
        MediaFetch::Streamed(_) => panic!("jpg objects are cached"),
    };
    assert!(cached.file_path.exists());

    let page_target: Arc<dyn InvalidationTarget> = pages.clone();
    let media_target: Arc<dyn InvalidationTarget> = media.clone();
    let (transport, publisher) = LocalTransport::new("webhook", 8);
    let handle = InvalidationListener::new(EventDispatcher::new(vec![page_target, media_target]))
        .with_transport(transport)
        .start()
        .await;
    assert_eq!(handle.active_transports(), vec!["webhook"]);

    publisher.publish(
        &br#"{"event":"on_media_delete","affectedContent":[{"root":"home","path":"/images/cat.jpg"}]}"#[..],
    );
    publisher.publish(&br#"{"event":"on_doc_update","affectedContent":[{"root":"home","path":"/about"}]}"#[..]);

    tokio::time::timeout(Duration::from_secs(2), async {
        while !(pages.is_empty() && media.is_empty() && !cached.file_path.exists()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("events applied");

    handle.shutdown().await;
}
