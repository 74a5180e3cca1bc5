//! Vitrine cache system.
//!
//! Two caches share one coordination primitive:
//!
//! - **Page cache**: rendered pages keyed by `(root, theme, path)`
//! - **Media cache**: remote objects mirrored to a local directory
//!
//! Both are invalidated by CMS events delivered through Redis pub/sub,
//! RabbitMQ, or the webhook route.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enable_page_cache = true
//! page_wait_ms = 100
//! media_wait_ms = 500
//!
//! [media]
//! cache_dir = "media-cache"
//! file_types_to_cache = [".jpg", ".png", ".webp"]
//! ```

mod coalesce;
mod config;
mod events;
mod keys;
mod listener;
mod media;
mod page;
pub mod transport;

pub use coalesce::CoalescingCache;
pub use config::CacheConfig;
pub use events::{AffectedContent, DecodeError, EventKind, InvalidationEvent};
pub use keys::{PageKey, Theme, media_cache_path, normalize_path};
pub use listener::{EventDispatcher, InvalidationListener, InvalidationTarget, ListenerHandle};
pub use media::{CachedMedia, MediaCache, MediaError, MediaFetch, StreamedMedia, purge_directory};
pub use page::PageCache;
