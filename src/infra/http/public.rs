use std::{io::ErrorKind, sync::Arc};

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode, Uri,
        header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, COOKIE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use percent_encoding::percent_decode_str;
use tracing::{debug, error};

use crate::{
    application::{
        error::HttpError,
        render::{PageRequest, RenderedPage},
        roots::RootMapper,
    },
    cache::{CachedMedia, MediaCache, MediaError, MediaFetch, PageCache, StreamedMedia, Theme},
    cache::transport::LocalPublisher,
};

use super::middleware::{log_responses, set_request_context};

pub const WEBHOOK_PATH: &str = "/cms-webhook-handler";
pub const WEBHOOK_SECRET_HEADER: &str = "x-secret";

/// Webhook delivery: requests carrying the shared secret are published to
/// the listener's in-process transport.
#[derive(Clone)]
pub struct WebhookState {
    pub secret: Arc<str>,
    pub publisher: LocalPublisher,
}

#[derive(Clone)]
pub struct HttpState {
    pub pages: Arc<PageCache>,
    pub media: Arc<MediaCache>,
    pub roots: Arc<RootMapper>,
    pub webhook: Option<WebhookState>,
}

pub fn build_router(state: HttpState, media_prefix: &str) -> Router {
    let mut router = Router::new()
        .route("/_health", get(health))
        .route(&format!("{media_prefix}/{{*path}}"), get(serve_media));

    if state.webhook.is_some() {
        router = router.route(WEBHOOK_PATH, post(webhook));
    }

    router
        .fallback(serve_page)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn serve_page(
    State(state): State<HttpState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return HttpError::new(
            "infra::http::public::serve_page",
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
            format!("{method} is not supported for pages"),
        )
        .into_response();
    }

    let path = match percent_decode_str(uri.path()).decode_utf8() {
        Ok(path) => path,
        Err(err) => {
            return HttpError::from_error(
                "infra::http::public::serve_page",
                StatusCode::BAD_REQUEST,
                "Invalid request path",
                &err,
            )
            .into_response();
        }
    };
    let resolved = state.roots.resolve(&path);
    let cookie = joined_header(&headers, COOKIE);
    let theme = Theme::from_cookie_header(cookie.as_deref());

    let request = PageRequest {
        root: resolved.root,
        path: resolved.path,
        theme,
        query: uri.query().map(str::to_string),
        cookie,
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    };

    match state.pages.serve(request).await {
        Ok(page) => build_page_response(page),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn serve_media(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::public::serve_media";

    match state.media.fetch(&path).await {
        Ok(MediaFetch::Streamed(media)) => build_streamed_response(media),
        Ok(MediaFetch::Cached(media)) => match read_cached(&media).await {
            Ok(bytes) => build_cached_response(&media, bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // Evicted between lookup and read.
                debug!(path = %path, "cached media vanished, fetching again");
                match state.media.fetch(&path).await {
                    Ok(MediaFetch::Cached(media)) => match read_cached(&media).await {
                        Ok(bytes) => build_cached_response(&media, bytes),
                        Err(err) => read_failure(SOURCE, &path, err),
                    },
                    Ok(MediaFetch::Streamed(media)) => build_streamed_response(media),
                    Err(err) => HttpError::from(err).into_response(),
                }
            }
            Err(err) => read_failure(SOURCE, &path, err),
        },
        Err(err) => {
            if matches!(err, MediaError::Fetch(ref fetch) if fetch.is_retryable()) {
                error!(target = SOURCE, path = %path, error = %err, "media fetch failed");
            }
            HttpError::from(err).into_response()
        }
    }
}

async fn webhook(State(state): State<HttpState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let Some(webhook) = state.webhook.as_ref() else {
        return StatusCode::NOT_FOUND;
    };

    let authorized = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|secret| secret == &*webhook.secret);

    if authorized {
        webhook.publisher.publish(body);
    } else {
        debug!("webhook call without a valid secret ignored");
    }

    StatusCode::NO_CONTENT
}

fn joined_header(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    (!values.is_empty()).then(|| values.join("; "))
}

async fn read_cached(media: &CachedMedia) -> std::io::Result<Bytes> {
    tokio::fs::read(&media.file_path).await.map(Bytes::from)
}

fn read_failure(source: &'static str, path: &str, err: std::io::Error) -> Response {
    error!(target = source, path = %path, error = %err, "failed to read cached media");
    HttpError::from_error(
        source,
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to read cached media",
        &err,
    )
    .into_response()
}

fn build_page_response(page: RenderedPage) -> Response {
    let mut response = Response::new(Body::from(page.body));
    *response.status_mut() = page.status;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&page.content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Some(value) = page
        .cache_control
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
    {
        headers.insert(CACHE_CONTROL, value);
    }

    response
}

fn build_cached_response(media: &CachedMedia, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&media.content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));

    response
}

fn build_streamed_response(media: StreamedMedia) -> Response {
    let mut response = Response::new(Body::from_stream(media.body));

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&media.content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Some(size) = media.size {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    }

    response
}
