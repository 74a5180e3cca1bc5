use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request, StatusCode, Uri},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Attach a request id, reusing one supplied by a fronting proxy.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let ctx = RequestContext { request_id };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

struct Exchange {
    method: Method,
    uri: Uri,
    request_id: String,
    elapsed_ms: u128,
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let exchange = Exchange {
        method,
        uri,
        request_id,
        elapsed_ms: start.elapsed().as_millis(),
    };
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let report = response.extensions_mut().remove::<ErrorReport>();
        log_failure(status, &exchange, report);
    } else {
        debug!(
            target = "vitrine::http::response",
            status = status.as_u16(),
            method = %exchange.method,
            path = %exchange.uri.path(),
            elapsed_ms = exchange.elapsed_ms,
            request_id = exchange.request_id,
            "request served",
        );
    }

    response
}

fn log_failure(status: StatusCode, exchange: &Exchange, report: Option<ErrorReport>) {
    let (source, messages) = report
        .map(|report| (report.source, report.messages))
        .unwrap_or(("unknown", Vec::new()));
    let detail = messages
        .first()
        .map(String::as_str)
        .unwrap_or("no diagnostic available");

    if status.is_server_error() {
        error!(
            target = "vitrine::http::response",
            status = status.as_u16(),
            method = %exchange.method,
            path = %exchange.uri.path(),
            query = exchange.uri.query().unwrap_or(""),
            elapsed_ms = exchange.elapsed_ms,
            source,
            detail,
            chain = ?messages,
            request_id = exchange.request_id,
            "request failed",
        );
    } else {
        warn!(
            target = "vitrine::http::response",
            status = status.as_u16(),
            method = %exchange.method,
            path = %exchange.uri.path(),
            query = exchange.uri.query().unwrap_or(""),
            elapsed_ms = exchange.elapsed_ms,
            source,
            detail,
            chain = ?messages,
            request_id = exchange.request_id,
            "client request error",
        );
    }
}
