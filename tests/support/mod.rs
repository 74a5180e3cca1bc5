#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use futures::StreamExt;
use vitrine::application::render::{
    DocumentInfo, DocumentStatus, PageRenderer, PageRequest, RenderError, RenderedPage,
};
use vitrine::application::storage::{FetchError, ObjectStore, RemoteObject};

/// Renderer that counts invocations and echoes the request into the body.
#[derive(Default)]
pub struct CountingRenderer {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
    pub status: Option<DocumentStatus>,
}

impl CountingRenderer {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageRenderer for CountingRenderer {
    async fn render(&self, request: &PageRequest) -> Result<RenderedPage, RenderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(RenderedPage {
            status: StatusCode::OK,
            content_type: "text/html; charset=utf-8".into(),
            cache_control: None,
            document: Some(DocumentInfo {
                status: self.status.unwrap_or(DocumentStatus::Published),
                auth_required: false,
            }),
            body: Bytes::from(format!(
                "{}|{}|{}|{}",
                request.root, request.path, request.theme, n
            )),
        })
    }
}

/// In-memory object store keyed by object path.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: HashMap<String, Bytes>,
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
}

impl MemoryObjectStore {
    pub fn with_object(mut self, path: &str, body: &'static [u8]) -> Self {
        self.objects.insert(path.to_owned(), Bytes::from_static(body));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn fetch(&self, path: &str) -> Result<RemoteObject, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let body = self.objects.get(path).cloned().ok_or_else(|| FetchError::NotFound {
            path: path.to_owned(),
        })?;

        let size = body.len() as u64;
        let (head, tail) = body.split_at(body.len() / 2);
        let chunks = vec![
            Ok::<_, io::Error>(Bytes::copy_from_slice(head)),
            Ok(Bytes::copy_from_slice(tail)),
        ];

        Ok(RemoteObject {
            content_type: None,
            size: Some(size),
            body: futures::stream::iter(chunks).boxed(),
        })
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
