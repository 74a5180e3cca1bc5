use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{render::RenderError, storage::FetchError},
    cache::MediaError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<RenderError> for HttpError {
    fn from(error: RenderError) -> Self {
        HttpError::from_error(
            "infra::http::render_error_to_http_error",
            StatusCode::BAD_GATEWAY,
            "Page could not be rendered",
            &error,
        )
    }
}

impl From<MediaError> for HttpError {
    fn from(error: MediaError) -> Self {
        const SOURCE: &str = "infra::http::media_error_to_http_error";
        match &error {
            MediaError::Fetch(FetchError::NotFound { .. }) => {
                HttpError::from_error(SOURCE, StatusCode::NOT_FOUND, "Media not found", &error)
            }
            MediaError::InvalidPath { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid media path",
                &error,
            ),
            MediaError::Fetch(FetchError::OtherProblem { .. }) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_GATEWAY,
                "Media temporarily unavailable",
                &error,
            ),
            MediaError::Io { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Media could not be served",
                &error,
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: impl Into<HttpError>) -> StatusCode {
        error.into().into_response().status()
    }

    #[test]
    fn media_errors_map_to_distinct_statuses() {
        let missing = MediaError::Fetch(FetchError::NotFound {
            path: "a.png".into(),
        });
        let broken = MediaError::Fetch(FetchError::other("a.png", "timeout"));
        let invalid = MediaError::InvalidPath {
            path: "../a.png".into(),
        };

        assert_eq!(status_of(missing), StatusCode::NOT_FOUND);
        assert_eq!(status_of(broken), StatusCode::BAD_GATEWAY);
        assert_eq!(status_of(invalid), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn render_errors_map_to_bad_gateway() {
        let response = HttpError::from(RenderError::Unavailable("refused".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.messages, vec!["renderer unavailable: refused".to_string()]);
    }
}
