//! Remote object fetch cache.
//!
//! Objects whose suffix is on the allow-list are downloaded once into a local
//! directory and served from disk afterwards; the coordinator stores the file
//! location, not the bytes. Everything else streams straight from the remote
//! store on every request and never touches the coordinator.

use std::collections::HashSet;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::coalesce::CoalescingCache;
use super::config::{CacheConfig, normalize_suffix};
use super::events::InvalidationEvent;
use super::keys::media_cache_path;
use super::listener::InvalidationTarget;
use crate::application::storage::{FetchError, ObjectBody, ObjectStore, RemoteObject};

const CACHE_NAME: &str = "media";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid media path `{path}`")]
    InvalidPath { path: String },
    #[error("failed to cache media at `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MediaError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// An object stored in the local media cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMedia {
    pub file_path: PathBuf,
    pub content_type: String,
    pub size: u64,
}

/// An object passed through from the remote store.
pub struct StreamedMedia {
    pub content_type: String,
    pub size: Option<u64>,
    pub body: ObjectBody,
}

impl fmt::Debug for StreamedMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamedMedia")
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum MediaFetch {
    Cached(CachedMedia),
    Streamed(StreamedMedia),
}

/// Disk-backed cache in front of an [`ObjectStore`].
pub struct MediaCache {
    store: CoalescingCache<CachedMedia>,
    objects: Arc<dyn ObjectStore>,
    cache_dir: PathBuf,
    allow_list: HashSet<String>,
    wait_budget: Duration,
}

impl MediaCache {
    pub fn new(objects: Arc<dyn ObjectStore>, config: &CacheConfig) -> Self {
        Self {
            store: CoalescingCache::new(CACHE_NAME),
            objects,
            cache_dir: config.media_cache_dir.clone(),
            allow_list: config.media_allow_list(),
            wait_budget: config.media_wait(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Create the cache directory if it does not exist yet.
    pub async fn prepare(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.cache_dir).await
    }

    /// Whether objects at `path` are eligible for the disk cache.
    pub fn is_cacheable_path(&self, path: &str) -> bool {
        file_suffix(path).is_some_and(|suffix| self.allow_list.contains(&suffix))
    }

    /// Fetch the object at `path`, through the disk cache when eligible.
    pub async fn fetch(&self, path: &str) -> Result<MediaFetch, MediaError> {
        let object_path = path.trim_start_matches('/');
        let Some(disk_path) = media_cache_path(&self.cache_dir, object_path) else {
            return Err(MediaError::InvalidPath {
                path: path.to_owned(),
            });
        };

        if !self.is_cacheable_path(object_path) {
            debug!(cache = CACHE_NAME, path = object_path, "streaming uncached media");
            let remote = self.objects.fetch(object_path).await?;
            return Ok(MediaFetch::Streamed(streamed(object_path, remote)));
        }

        let cached = self.fetch_cached(object_path, &disk_path).await?;
        if fs::try_exists(&cached.file_path).await.unwrap_or(false) {
            return Ok(MediaFetch::Cached(cached));
        }

        warn!(
            cache = CACHE_NAME,
            path = %cached.file_path.display(),
            "cached media file missing, fetching again"
        );
        self.store.invalidate(&cache_key(&disk_path));
        let cached = self.fetch_cached(object_path, &disk_path).await?;
        Ok(MediaFetch::Cached(cached))
    }

    async fn fetch_cached(
        &self,
        object_path: &str,
        disk_path: &Path,
    ) -> Result<CachedMedia, MediaError> {
        let objects = Arc::clone(&self.objects);
        self.store
            .get_or_compute(
                &cache_key(disk_path),
                |_| download(objects, object_path, disk_path),
                |_| true,
                self.wait_budget,
            )
            .await
    }

    /// Drop the cached file or directory for an object path named by an event.
    pub async fn evict(&self, path: &str) {
        let object_path = path.trim_start_matches('/');
        let Some(disk_path) = media_cache_path(&self.cache_dir, object_path) else {
            warn!(cache = CACHE_NAME, path, "ignoring invalid media path");
            return;
        };

        self.store
            .invalidate_matching(|key| Path::new(key).starts_with(&disk_path));

        let removed = match fs::metadata(&disk_path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&disk_path).await,
            Ok(_) => fs::remove_file(&disk_path).await,
            Err(err) => Err(err),
        };
        match removed {
            Ok(()) => info!(cache = CACHE_NAME, path = %disk_path.display(), "cached media removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                cache = CACHE_NAME,
                path = %disk_path.display(),
                error = %err,
                "failed to remove cached media"
            ),
        }
    }

    /// Drop every entry and wipe the cache directory.
    pub async fn clear(&self) {
        self.store.clear();
        if let Err(err) = purge_directory(&self.cache_dir).await {
            warn!(
                cache = CACHE_NAME,
                path = %self.cache_dir.display(),
                error = %err,
                "failed to wipe media cache directory"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.store.pending_len()
    }
}

#[async_trait]
impl InvalidationTarget for MediaCache {
    fn name(&self) -> &'static str {
        CACHE_NAME
    }

    async fn apply(&self, event: &InvalidationEvent) {
        if !event.event.is_media() {
            return;
        }

        match event.affected_content.as_deref() {
            Some(affected) => {
                for content in affected {
                    self.evict(&content.path).await;
                }
            }
            None => {
                self.clear().await;
                info!(cache = CACHE_NAME, event = event.event.as_str(), "media cache cleared");
            }
        }
    }
}

/// Remove everything under `dir` and recreate it empty.
pub async fn purge_directory(dir: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    fs::create_dir_all(dir).await
}

fn cache_key(disk_path: &Path) -> String {
    disk_path.to_string_lossy().into_owned()
}

fn file_suffix(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (stem, extension) = name.rsplit_once('.')?;
    (!stem.is_empty() && !extension.is_empty()).then(|| normalize_suffix(extension))
}

fn content_type_for(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_owned()
}

fn streamed(object_path: &str, remote: RemoteObject) -> StreamedMedia {
    StreamedMedia {
        content_type: content_type_for(object_path),
        size: remote.size,
        body: remote.body,
    }
}

/// Stream a remote object into `target`, renaming it into place when complete.
async fn download(
    objects: Arc<dyn ObjectStore>,
    object_path: &str,
    target: &Path,
) -> Result<CachedMedia, MediaError> {
    let remote = objects.fetch(object_path).await?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| MediaError::io(parent, err))?;
    }

    let partial = partial_path(target);
    let written = match write_body(&partial, remote.body).await {
        Ok(written) => written,
        Err(err) => {
            let _ = fs::remove_file(&partial).await;
            return Err(err);
        }
    };

    if let Err(err) = fs::rename(&partial, target).await {
        let _ = fs::remove_file(&partial).await;
        return Err(MediaError::io(target, err));
    }

    debug!(cache = CACHE_NAME, path = %target.display(), size = written, "media cached");
    Ok(CachedMedia {
        file_path: target.to_path_buf(),
        content_type: content_type_for(object_path),
        size: written,
    })
}

async fn write_body(partial: &Path, mut body: ObjectBody) -> Result<u64, MediaError> {
    let mut file = fs::File::create(partial)
        .await
        .map_err(|err| MediaError::io(partial, err))?;
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| MediaError::io(partial, err))?;
        file.write_all(&chunk)
            .await
            .map_err(|err| MediaError::io(partial, err))?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(|err| MediaError::io(partial, err))?;
    Ok(written)
}

fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{name}.{}.part", Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_suffix_uses_last_extension() {
        assert_eq!(file_suffix("img/cat.JPG").as_deref(), Some(".jpg"));
        assert_eq!(file_suffix("archive.tar.gz").as_deref(), Some(".gz"));
        assert_eq!(file_suffix("img/.hidden"), None);
        assert_eq!(file_suffix("img/README"), None);
        assert_eq!(file_suffix("dir.d/README"), None);
    }

    #[test]
    fn content_type_falls_back_to_octet_stream() {
        assert_eq!(content_type_for("a/cat.png"), "image/png");
        assert_eq!(content_type_for("a/blob.unknownext"), "application/octet-stream");
    }

    #[test]
    fn partial_path_stays_beside_target() {
        let target = Path::new("/cache/img/cat.png");
        let partial = partial_path(target);
        assert_eq!(partial.parent(), target.parent());
        let name = partial.file_name().expect("name").to_string_lossy();
        assert!(name.starts_with("cat.png."));
        assert!(name.ends_with(".part"));
    }
}
