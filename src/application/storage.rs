//! Remote object store collaborator.

use std::fmt;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// Byte stream of a remote object body.
pub type ObjectBody = BoxStream<'static, Result<Bytes, io::Error>>;

/// An object fetched from the remote store, body not yet consumed.
pub struct RemoteObject {
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub body: ObjectBody,
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("object `{path}` not found")]
    NotFound { path: String },
    #[error("failed to fetch object `{path}`: {message}")]
    OtherProblem { path: String, message: String },
}

impl FetchError {
    pub fn other(path: &str, err: impl fmt::Display) -> Self {
        Self::OtherProblem {
            path: path.to_owned(),
            message: err.to_string(),
        }
    }

    /// `NotFound` is terminal for a path; everything else may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::OtherProblem { .. })
    }
}

/// Fetches objects by path from remote storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<RemoteObject, FetchError>;
}
