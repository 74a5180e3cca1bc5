//! Page rendering collaborator.
//!
//! The front-end never renders documents itself: it hands a [`PageRequest`]
//! to a [`PageRenderer`] and caches what comes back when the result is safe to
//! share between visitors.

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use thiserror::Error;

use crate::cache::Theme;

const NO_STORE_DIRECTIVE: &str = "no-store";

/// Everything a renderer needs to produce one page.
#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Content root the document lives under.
    pub root: String,
    /// Normalized document path within the root.
    pub path: String,
    pub theme: Theme,
    /// Raw query string, when the request carried one.
    pub query: Option<String>,
    /// Raw `Cookie` header forwarded for authorization decisions.
    pub cookie: Option<String>,
    /// Raw `Authorization` header forwarded for authorization decisions.
    pub authorization: Option<String>,
}

impl PageRequest {
    pub fn new(root: impl Into<String>, path: impl Into<String>, theme: Theme) -> Self {
        Self {
            root: root.into(),
            path: path.into(),
            theme,
            query: None,
            cookie: None,
            authorization: None,
        }
    }

    pub fn has_query(&self) -> bool {
        self.query.as_deref().is_some_and(|query| !query.is_empty())
    }
}

/// Publication state of the document behind a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Draft,
    Published,
    Archived,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Published => "published",
            DocumentStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" | "0" => Some(DocumentStatus::Draft),
            "published" | "1" => Some(DocumentStatus::Published),
            "archived" | "2" => Some(DocumentStatus::Archived),
            _ => None,
        }
    }
}

/// Metadata about the document a page was rendered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentInfo {
    pub status: DocumentStatus,
    pub auth_required: bool,
}

/// A fully rendered page as produced by a [`PageRenderer`].
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub status: StatusCode,
    pub content_type: String,
    pub cache_control: Option<String>,
    /// `None` when no document backs the response (e.g. a 404 page).
    pub document: Option<DocumentInfo>,
    pub body: Bytes,
}

impl RenderedPage {
    /// Whether this page may be stored and served to other visitors.
    ///
    /// Requires a 200 response for a published, public document without a
    /// `no-store` cache directive.
    pub fn is_cacheable(&self) -> bool {
        let public_document = self.document.is_some_and(|document| {
            document.status == DocumentStatus::Published && !document.auth_required
        });
        let storable = self.cache_control.as_deref().is_none_or(|directives| {
            !directives
                .split(',')
                .any(|directive| directive.trim().eq_ignore_ascii_case(NO_STORE_DIRECTIVE))
        });

        self.status == StatusCode::OK && public_document && storable
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }
}

#[derive(Debug, Error, Clone)]
pub enum RenderError {
    #[error("renderer unavailable: {0}")]
    Unavailable(String),
    #[error("renderer returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Renders pages for the front-end.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, request: &PageRequest) -> Result<RenderedPage, RenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(status: StatusCode, document: Option<DocumentInfo>) -> RenderedPage {
        RenderedPage {
            status,
            content_type: "text/html; charset=utf-8".into(),
            cache_control: None,
            document,
            body: Bytes::from_static(b"<html></html>"),
        }
    }

    const PUBLISHED: DocumentInfo = DocumentInfo {
        status: DocumentStatus::Published,
        auth_required: false,
    };

    #[test]
    fn published_public_page_is_cacheable() {
        assert!(page(StatusCode::OK, Some(PUBLISHED)).is_cacheable());
    }

    #[test]
    fn non_ok_status_is_not_cacheable() {
        assert!(!page(StatusCode::NOT_FOUND, Some(PUBLISHED)).is_cacheable());
    }

    #[test]
    fn draft_or_protected_documents_are_not_cacheable() {
        let draft = DocumentInfo {
            status: DocumentStatus::Draft,
            ..PUBLISHED
        };
        let protected = DocumentInfo {
            auth_required: true,
            ..PUBLISHED
        };

        assert!(!page(StatusCode::OK, Some(draft)).is_cacheable());
        assert!(!page(StatusCode::OK, Some(protected)).is_cacheable());
        assert!(!page(StatusCode::OK, None).is_cacheable());
    }

    #[test]
    fn no_store_directive_prevents_caching() {
        let mut rendered = page(StatusCode::OK, Some(PUBLISHED));
        rendered.cache_control = Some("max-age=0, no-store".into());
        assert!(!rendered.is_cacheable());

        rendered.cache_control = Some("public, max-age=60".into());
        assert!(rendered.is_cacheable());
    }

    #[test]
    fn document_status_parses_names_and_codes() {
        assert_eq!(DocumentStatus::parse("Published"), Some(DocumentStatus::Published));
        assert_eq!(DocumentStatus::parse("1"), Some(DocumentStatus::Published));
        assert_eq!(DocumentStatus::parse("draft"), Some(DocumentStatus::Draft));
        assert_eq!(DocumentStatus::parse("unknown"), None);
    }

    #[test]
    fn query_detection_ignores_empty_query() {
        let mut request = PageRequest::new("home", "/", Theme::Light);
        assert!(!request.has_query());
        request.query = Some(String::new());
        assert!(!request.has_query());
        request.query = Some("p=2".into());
        assert!(request.has_query());
    }
}
