//! Cache configuration.
//!
//! Runtime knobs for the page response cache and the media fetch cache,
//! derived from the resolved [`Settings`](crate::config::Settings).

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    DEFAULT_MEDIA_CACHE_DIR, DEFAULT_MEDIA_WAIT_MS, DEFAULT_PAGE_WAIT_MS, Settings,
};

/// Cache configuration handed to [`PageCache`](super::PageCache) and
/// [`MediaCache`](super::MediaCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Serve query-less page requests through the page cache.
    pub enable_page_cache: bool,
    /// How long a page request waits for an in-flight render of the same key.
    pub page_wait_ms: u64,
    /// How long a media request waits for an in-flight fetch of the same object.
    pub media_wait_ms: u64,
    /// Directory holding cached media objects.
    pub media_cache_dir: PathBuf,
    /// File suffixes (with the leading dot) eligible for the media cache.
    pub media_file_types: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_page_cache: true,
            page_wait_ms: DEFAULT_PAGE_WAIT_MS,
            media_wait_ms: DEFAULT_MEDIA_WAIT_MS,
            media_cache_dir: PathBuf::from(DEFAULT_MEDIA_CACHE_DIR),
            media_file_types: Vec::new(),
        }
    }
}

impl From<&Settings> for CacheConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            enable_page_cache: settings.cache.enable_page_cache,
            page_wait_ms: settings.cache.page_wait.as_millis() as u64,
            media_wait_ms: settings.cache.media_wait.as_millis() as u64,
            media_cache_dir: settings.media.cache_dir.clone(),
            media_file_types: settings.media.file_types_to_cache.clone(),
        }
    }
}

impl CacheConfig {
    pub fn page_wait(&self) -> Duration {
        Duration::from_millis(self.page_wait_ms)
    }

    pub fn media_wait(&self) -> Duration {
        Duration::from_millis(self.media_wait_ms)
    }

    /// Normalized allow-list of cacheable media suffixes.
    pub fn media_allow_list(&self) -> HashSet<String> {
        self.media_file_types
            .iter()
            .map(|suffix| normalize_suffix(suffix))
            .filter(|suffix| suffix.len() > 1)
            .collect()
    }
}

/// Lowercase a file suffix and make sure it starts with a dot.
pub(crate) fn normalize_suffix(suffix: &str) -> String {
    let trimmed = suffix.trim().to_ascii_lowercase();
    if trimmed.starts_with('.') {
        trimmed
    } else {
        format!(".{trimmed}")
    }
}
