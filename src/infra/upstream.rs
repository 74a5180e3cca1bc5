//! HTTP client for the upstream page renderer.
//!
//! The renderer is asked for `GET {base_url}/{root}/{path}?{query}` with the
//! visitor's `Cookie` and `Authorization` headers forwarded. Document
//! metadata travels back in response headers:
//!
//! - `x-document-status`: `draft`, `published`, or `archived` (or `0`/`1`/`2`)
//! - `x-auth-required`: `true` when the document is not public

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, COOKIE, HeaderMap};
use reqwest::{Client, Url};
use tracing::debug;

use crate::application::render::{
    DocumentInfo, DocumentStatus, PageRenderer, PageRequest, RenderError, RenderedPage,
};
use crate::infra::error::InfraError;

pub const DOCUMENT_STATUS_HEADER: &str = "x-document-status";
pub const AUTH_REQUIRED_HEADER: &str = "x-auth-required";
pub const THEME_HEADER: &str = "x-vitrine-theme";

const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Debug, Clone)]
pub struct HttpRenderer {
    client: Client,
    base_url: Url,
}

impl HttpRenderer {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base_url })
    }

    fn page_url(&self, request: &PageRequest) -> Result<Url, RenderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RenderError::InvalidResponse("renderer URL cannot be a base".into()))?
            .pop_if_empty()
            .push(&request.root)
            .extend(request.path.split('/').filter(|segment| !segment.is_empty()));
        url.set_query(request.query.as_deref().filter(|query| !query.is_empty()));
        Ok(url)
    }
}

pub(crate) fn user_agent() -> &'static str {
    concat!("vitrine/", env!("CARGO_PKG_VERSION"))
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(&self, request: &PageRequest) -> Result<RenderedPage, RenderError> {
        let url = self.page_url(request)?;
        debug!(url = %url, theme = %request.theme, "requesting page from renderer");

        let mut outbound = self
            .client
            .get(url)
            .header(THEME_HEADER, request.theme.as_str());
        if let Some(cookie) = request.cookie.as_deref() {
            outbound = outbound.header(COOKIE, cookie);
        }
        if let Some(authorization) = request.authorization.as_deref() {
            outbound = outbound.header(AUTHORIZATION, authorization);
        }

        let response = outbound
            .send()
            .await
            .map_err(|err| RenderError::Unavailable(err.to_string()))?;

        let status = response.status();
        let headers = response.headers();
        let content_type = header_str(headers, CONTENT_TYPE.as_str())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let cache_control = header_str(headers, CACHE_CONTROL.as_str()).map(str::to_string);
        let document = document_info(headers)?;

        let body = response
            .bytes()
            .await
            .map_err(|err| RenderError::Unavailable(err.to_string()))?;

        Ok(RenderedPage {
            status,
            content_type,
            cache_control,
            document,
            body,
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn document_info(headers: &HeaderMap) -> Result<Option<DocumentInfo>, RenderError> {
    let Some(raw_status) = header_str(headers, DOCUMENT_STATUS_HEADER) else {
        return Ok(None);
    };
    let status = DocumentStatus::parse(raw_status).ok_or_else(|| {
        RenderError::InvalidResponse(format!("unknown document status `{raw_status}`"))
    })?;
    let auth_required = header_str(headers, AUTH_REQUIRED_HEADER)
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1"))
        .unwrap_or(false);

    Ok(Some(DocumentInfo {
        status,
        auth_required,
    }))
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;
    use crate::cache::Theme;

    fn renderer(base: &str) -> HttpRenderer {
        HttpRenderer::new(Url::parse(base).expect("url"), Duration::from_secs(1))
            .expect("client")
    }

    #[test]
    fn page_url_joins_root_and_path() {
        let renderer = renderer("http://renderer.local/render/");
        let mut request = PageRequest::new("home-fr", "/about/team", Theme::Light);
        assert_eq!(
            renderer.page_url(&request).expect("url").as_str(),
            "http://renderer.local/render/home-fr/about/team"
        );

        request.path = "/".into();
        request.query = Some("page=2".into());
        assert_eq!(
            renderer.page_url(&request).expect("url").as_str(),
            "http://renderer.local/render/home-fr?page=2"
        );
    }

    #[test]
    fn page_url_encodes_decoded_segments_once() {
        let renderer = renderer("http://renderer.local/");
        let request = PageRequest::new("home", "/café", Theme::Light);
        assert_eq!(
            renderer.page_url(&request).expect("url").as_str(),
            "http://renderer.local/home/caf%C3%A9"
        );
    }

    #[test]
    fn document_info_reads_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(document_info(&headers).expect("ok"), None);

        headers.insert(DOCUMENT_STATUS_HEADER, HeaderValue::from_static("published"));
        headers.insert(AUTH_REQUIRED_HEADER, HeaderValue::from_static("TRUE"));
        assert_eq!(
            document_info(&headers).expect("ok"),
            Some(DocumentInfo {
                status: DocumentStatus::Published,
                auth_required: true,
            })
        );

        headers.insert(DOCUMENT_STATUS_HEADER, HeaderValue::from_static("mystery"));
        assert!(document_info(&headers).is_err());
    }
}
