//! HTTP client for an S3-compatible object store.
//!
//! Objects are read with path-style URLs: `GET {endpoint}/{bucket}/{path}`.
//! The bucket is expected to allow reads from this service.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use tracing::error;

use crate::application::storage::{FetchError, ObjectStore, RemoteObject};
use crate::infra::error::InfraError;
use crate::infra::upstream::user_agent;

#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: Url,
    bucket: String,
}

impl HttpObjectStore {
    pub fn new(endpoint: Url, bucket: String, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            bucket,
        })
    }

    fn object_url(&self, path: &str) -> Result<Url, FetchError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::other(path, "object store endpoint cannot be a base"))?
            .pop_if_empty()
            .push(&self.bucket)
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch(&self, path: &str) -> Result<RemoteObject, FetchError> {
        let url = self.object_url(path)?;

        let response = self.client.get(url).send().await.map_err(|err| {
            error!(path, error = %err, "failed to reach object store");
            FetchError::other(path, err)
        })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(FetchError::NotFound {
                    path: path.to_owned(),
                });
            }
            status => {
                error!(path, status = status.as_u16(), "object store rejected request");
                return Err(FetchError::other(path, format!("unexpected status {status}")));
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let size = response.content_length();
        let body = response.bytes_stream().map_err(io::Error::other).boxed();

        Ok(RemoteObject {
            content_type,
            size,
            body,
        })
    }
}

/// Stand-in used when no object store endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredObjectStore;

#[async_trait]
impl ObjectStore for UnconfiguredObjectStore {
    async fn fetch(&self, path: &str) -> Result<RemoteObject, FetchError> {
        error!(path, "media storage is not configured");
        Err(FetchError::other(path, "media storage is not configured"))
    }
}
