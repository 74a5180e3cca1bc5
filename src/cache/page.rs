//! Page response cache.
//!
//! Caches rendered pages keyed by `(root, theme, path)`. Only query-less
//! requests are eligible, and a rendered page is stored only when it is
//! public, published, and free of a `no-store` directive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::coalesce::CoalescingCache;
use super::events::{EventKind, InvalidationEvent};
use super::keys::PageKey;
use super::listener::InvalidationTarget;
use crate::application::render::{PageRenderer, PageRequest, RenderError, RenderedPage};

const CACHE_NAME: &str = "page";

/// Page cache in front of a [`PageRenderer`].
pub struct PageCache {
    store: CoalescingCache<RenderedPage>,
    renderer: Arc<dyn PageRenderer>,
    enabled: bool,
    wait_budget: Duration,
}

impl PageCache {
    pub fn new(renderer: Arc<dyn PageRenderer>, enabled: bool, wait_budget: Duration) -> Self {
        Self {
            store: CoalescingCache::new(CACHE_NAME),
            renderer,
            enabled,
            wait_budget,
        }
    }

    /// Serve a page, from cache when possible.
    pub async fn serve(&self, request: PageRequest) -> Result<RenderedPage, RenderError> {
        if !self.enabled || request.has_query() {
            return self.renderer.render(&request).await;
        }

        let key = PageKey::new(request.root.clone(), request.theme, &request.path).to_string();
        let renderer = Arc::clone(&self.renderer);

        self.store
            .get_or_compute(
                &key,
                move |_| async move { renderer.render(&request).await },
                RenderedPage::is_cacheable,
                self.wait_budget,
            )
            .await
    }

    /// Cached page for `key`, if any.
    pub fn cached(&self, key: &PageKey) -> Option<RenderedPage> {
        self.store.try_get(&key.to_string())
    }

    /// Drop both theme variants of `(root, path)`.
    pub fn invalidate_path(&self, root: &str, path: &str) -> usize {
        PageKey::variants(root, path)
            .iter()
            .filter(|key| self.store.invalidate(&key.to_string()))
            .count()
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl InvalidationTarget for PageCache {
    fn name(&self) -> &'static str {
        CACHE_NAME
    }

    async fn apply(&self, event: &InvalidationEvent) {
        match (event.event, event.affected_content.as_deref()) {
            (EventKind::DocUpdate, Some(affected)) => {
                for content in affected {
                    let removed = self.invalidate_path(&content.root, &content.path);
                    info!(
                        cache = CACHE_NAME,
                        root = %content.root,
                        path = %content.path,
                        removed,
                        "page entries invalidated"
                    );
                }
            }
            (kind, _) if kind.is_media() || kind == EventKind::Unknown => {
                debug!(cache = CACHE_NAME, event = kind.as_str(), "event ignored");
            }
            (kind, _) => {
                self.clear();
                info!(cache = CACHE_NAME, event = kind.as_str(), "page cache cleared");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::http::StatusCode;
    use bytes::Bytes;

    use super::*;
    use crate::application::render::{DocumentInfo, DocumentStatus};
    use crate::cache::Theme;

    #[derive(Default)]
    struct CountingRenderer {
        calls: AtomicUsize,
        auth_required: bool,
    }

    #[async_trait]
    impl PageRenderer for CountingRenderer {
        async fn render(&self, request: &PageRequest) -> Result<RenderedPage, RenderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RenderedPage {
                status: StatusCode::OK,
                content_type: "text/html".into(),
                cache_control: None,
                document: Some(DocumentInfo {
                    status: DocumentStatus::Published,
                    auth_required: self.auth_required,
                }),
                body: Bytes::from(format!("{}:{}:{}", request.root, request.path, n)),
            })
        }
    }

    fn cache_with(renderer: Arc<CountingRenderer>, enabled: bool) -> PageCache {
        PageCache::new(renderer, enabled, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn repeated_requests_hit_the_cache() {
        let renderer = Arc::new(CountingRenderer::default());
        let cache = cache_with(Arc::clone(&renderer), true);

        let first = cache
            .serve(PageRequest::new("home", "/about", Theme::Light))
            .await
            .expect("render");
        let second = cache
            .serve(PageRequest::new("home", "/about", Theme::Light))
            .await
            .expect("render");

        assert_eq!(first.body, second.body);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert!(
            cache
                .cached(&PageKey::new("home", Theme::Light, "/about"))
                .is_some()
        );
    }

    #[tokio::test]
    async fn themes_are_cached_separately() {
        let renderer = Arc::new(CountingRenderer::default());
        let cache = cache_with(Arc::clone(&renderer), true);

        for theme in Theme::ALL {
            cache
                .serve(PageRequest::new("home", "/about", theme))
                .await
                .expect("render");
        }

        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn query_requests_bypass_the_cache() {
        let renderer = Arc::new(CountingRenderer::default());
        let cache = cache_with(Arc::clone(&renderer), true);

        let mut request = PageRequest::new("home", "/search", Theme::Light);
        request.query = Some("q=rust".into());
        cache.serve(request.clone()).await.expect("render");
        cache.serve(request).await.expect("render");

        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn disabled_cache_always_renders() {
        let renderer = Arc::new(CountingRenderer::default());
        let cache = cache_with(Arc::clone(&renderer), false);

        for _ in 0..2 {
            cache
                .serve(PageRequest::new("home", "/", Theme::Light))
                .await
                .expect("render");
        }

        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn protected_pages_are_not_cached() {
        let renderer = Arc::new(CountingRenderer {
            auth_required: true,
            ..Default::default()
        });
        let cache = cache_with(Arc::clone(&renderer), true);

        cache
            .serve(PageRequest::new("home", "/members", Theme::Dark))
            .await
            .expect("render");

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn doc_update_with_empty_list_changes_nothing() {
        let renderer = Arc::new(CountingRenderer::default());
        let cache = cache_with(renderer, true);
        cache
            .serve(PageRequest::new("home", "/about", Theme::Light))
            .await
            .expect("render");

        cache
            .apply(&InvalidationEvent::with_affected(EventKind::DocUpdate, []))
            .await;

        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn media_events_leave_pages_alone() {
        let renderer = Arc::new(CountingRenderer::default());
        let cache = cache_with(renderer, true);
        cache
            .serve(PageRequest::new("home", "/about", Theme::Light))
            .await
            .expect("render");

        cache
            .apply(&InvalidationEvent::new(EventKind::MediaDelete))
            .await;
        cache.apply(&InvalidationEvent::new(EventKind::Unknown)).await;

        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn doc_update_without_list_clears_everything() {
        let renderer = Arc::new(CountingRenderer::default());
        let cache = cache_with(renderer, true);
        for path in ["/a", "/b"] {
            cache
                .serve(PageRequest::new("home", path, Theme::Light))
                .await
                .expect("render");
        }

        cache
            .apply(&InvalidationEvent::new(EventKind::DocUpdate))
            .await;

        assert!(cache.is_empty());
    }
}
