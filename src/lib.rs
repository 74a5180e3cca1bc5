//! Vitrine: a caching front-end for a headless CMS.
//!
//! Page renders and media objects are served through single-flight caches
//! that coalesce concurrent misses, and are invalidated by content events
//! arriving over Redis, RabbitMQ, or a webhook.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
