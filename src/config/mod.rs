//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::HashMap, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::transport::{RabbitSettings, RedisSettings};

mod cli;

pub use cli::{CliArgs, Command, MediaCacheDirOverride, PurgeMediaArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vitrine";
const ENV_PREFIX: &str = "VITRINE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8085;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;
pub(crate) const DEFAULT_PAGE_WAIT_MS: u64 = 100;
pub(crate) const DEFAULT_MEDIA_WAIT_MS: u64 = 500;
const DEFAULT_ROOT: &str = "home";
pub(crate) const DEFAULT_MEDIA_CACHE_DIR: &str = "media-cache";
const DEFAULT_MEDIA_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MEDIA_ROUTE_PREFIX: &str = "/media";
const DEFAULT_EXCHANGE_TYPE: &str = "fanout";
const EXCHANGE_TYPES: [&str; 4] = ["fanout", "direct", "topic", "headers"];

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub upstream: UpstreamSettings,
    pub cache: CacheSettings,
    pub roots: RootSettings,
    pub media: MediaSettings,
    pub events: EventSettings,
    pub webhook: WebhookSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Renderer base URL. Required by `serve`.
    pub base_url: Option<Url>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enable_page_cache: bool,
    pub page_wait: Duration,
    pub media_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct RootSettings {
    pub default_root: String,
    /// Leading path segment → content root.
    pub language_roots: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub endpoint: Option<Url>,
    pub bucket: String,
    pub cache_dir: PathBuf,
    pub file_types_to_cache: Vec<String>,
    pub timeout: Duration,
    pub route_prefix: String,
}

#[derive(Debug, Clone, Default)]
pub struct EventSettings {
    pub redis: Option<RedisSettings>,
    pub rabbit: Option<RabbitSettings>,
}

#[derive(Debug, Clone, Default)]
pub struct WebhookSettings {
    pub secret: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("media.file_types_to_cache")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::PurgeMedia(args)) => raw.apply_media_override(&args.media),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    upstream: RawUpstreamSettings,
    cache: RawCacheSettings,
    roots: RawRootSettings,
    media: RawMediaSettings,
    events: RawEventSettings,
    webhook: RawWebhookSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.upstream_url.as_ref() {
            self.upstream.base_url = Some(url.clone());
        }
        if let Some(enabled) = overrides.cache_enable_page_cache {
            self.cache.enable_page_cache = Some(enabled);
        }

        self.apply_media_override(&overrides.media);
    }

    fn apply_media_override(&mut self, overrides: &MediaCacheDirOverride) {
        if let Some(dir) = overrides.media_cache_dir.as_ref() {
            self.media.cache_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            upstream,
            cache,
            roots,
            media,
            events,
            webhook,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            upstream: build_upstream_settings(upstream)?,
            cache: build_cache_settings(cache)?,
            roots: build_root_settings(roots)?,
            media: build_media_settings(media)?,
            events: build_event_settings(events)?,
            webhook: build_webhook_settings(webhook),
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let base_url = parse_http_url(upstream.base_url, "upstream.base_url")?;
    let timeout = positive_seconds(
        upstream.timeout_seconds,
        DEFAULT_UPSTREAM_TIMEOUT_SECS,
        "upstream.timeout_seconds",
    )?;

    Ok(UpstreamSettings { base_url, timeout })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let page_wait_ms = cache.page_wait_ms.unwrap_or(DEFAULT_PAGE_WAIT_MS);
    if page_wait_ms == 0 {
        return Err(LoadError::invalid(
            "cache.page_wait_ms",
            "must be greater than zero",
        ));
    }

    let media_wait_ms = cache.media_wait_ms.unwrap_or(DEFAULT_MEDIA_WAIT_MS);
    if media_wait_ms == 0 {
        return Err(LoadError::invalid(
            "cache.media_wait_ms",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        enable_page_cache: cache.enable_page_cache.unwrap_or(true),
        page_wait: Duration::from_millis(page_wait_ms),
        media_wait: Duration::from_millis(media_wait_ms),
    })
}

fn build_root_settings(roots: RawRootSettings) -> Result<RootSettings, LoadError> {
    let default_root = non_empty(roots.default_root).unwrap_or_else(|| DEFAULT_ROOT.to_string());

    let language_roots = match roots.language_roots {
        Some(map) => map
            .into_iter()
            .map(|(segment, root)| {
                let segment = segment.trim().trim_matches('/').to_ascii_lowercase();
                if segment.is_empty() || segment.contains('/') {
                    return Err(LoadError::invalid(
                        "roots.language_roots",
                        format!("`{segment}` is not a single path segment"),
                    ));
                }
                let root = non_empty(Some(root)).ok_or_else(|| {
                    LoadError::invalid("roots.language_roots", "root names must not be empty")
                })?;
                Ok((segment, root))
            })
            .collect::<Result<HashMap<_, _>, _>>()?,
        None => HashMap::from([("fr".to_string(), "home-fr".to_string())]),
    };

    Ok(RootSettings {
        default_root,
        language_roots,
    })
}

fn build_media_settings(media: RawMediaSettings) -> Result<MediaSettings, LoadError> {
    let endpoint = parse_http_url(media.endpoint, "media.endpoint")?;
    let bucket = non_empty(media.bucket).unwrap_or_default();
    if endpoint.is_some() && bucket.is_empty() {
        return Err(LoadError::invalid(
            "media.bucket",
            "required when media.endpoint is set",
        ));
    }

    let cache_dir = media
        .cache_dir
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_CACHE_DIR));

    let file_types_to_cache = media
        .file_types_to_cache
        .unwrap_or_default()
        .into_iter()
        .filter_map(|suffix| non_empty(Some(suffix)))
        .collect();

    let timeout = positive_seconds(
        media.timeout_seconds,
        DEFAULT_MEDIA_TIMEOUT_SECS,
        "media.timeout_seconds",
    )?;

    let route_prefix = match non_empty(media.route_prefix) {
        Some(prefix) => {
            let trimmed = prefix.trim_end_matches('/');
            if !trimmed.starts_with('/') || trimmed.len() < 2 {
                return Err(LoadError::invalid(
                    "media.route_prefix",
                    "must start with `/` and name at least one segment",
                ));
            }
            trimmed.to_string()
        }
        None => DEFAULT_MEDIA_ROUTE_PREFIX.to_string(),
    };

    Ok(MediaSettings {
        endpoint,
        bucket,
        cache_dir,
        file_types_to_cache,
        timeout,
        route_prefix,
    })
}

fn build_event_settings(events: RawEventSettings) -> Result<EventSettings, LoadError> {
    let RawEventSettings { redis, rabbit } = events;

    let redis = match (non_empty(redis.url), non_empty(redis.channel)) {
        (Some(url), Some(channel)) => Some(RedisSettings { url, channel }),
        (None, None) => None,
        (Some(_), None) => {
            return Err(LoadError::invalid(
                "events.redis.channel",
                "required when events.redis.url is set",
            ));
        }
        (None, Some(_)) => {
            return Err(LoadError::invalid(
                "events.redis.url",
                "required when events.redis.channel is set",
            ));
        }
    };

    let rabbit = match (non_empty(rabbit.url), non_empty(rabbit.exchange)) {
        (Some(url), Some(exchange)) => {
            let exchange_type = non_empty(rabbit.exchange_type)
                .map(|kind| kind.to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_EXCHANGE_TYPE.to_string());
            if !EXCHANGE_TYPES.contains(&exchange_type.as_str()) {
                return Err(LoadError::invalid(
                    "events.rabbit.exchange_type",
                    format!("expected one of {}", EXCHANGE_TYPES.join("|")),
                ));
            }
            Some(RabbitSettings {
                url,
                exchange,
                exchange_type,
                routing_key: rabbit.routing_key.unwrap_or_default(),
            })
        }
        (None, None) => None,
        (Some(_), None) => {
            return Err(LoadError::invalid(
                "events.rabbit.exchange",
                "required when events.rabbit.url is set",
            ));
        }
        (None, Some(_)) => {
            return Err(LoadError::invalid(
                "events.rabbit.url",
                "required when events.rabbit.exchange is set",
            ));
        }
    };

    Ok(EventSettings { redis, rabbit })
}

fn build_webhook_settings(webhook: RawWebhookSettings) -> WebhookSettings {
    WebhookSettings {
        secret: non_empty(webhook.secret),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enable_page_cache: Option<bool>,
    page_wait_ms: Option<u64>,
    media_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRootSettings {
    default_root: Option<String>,
    language_roots: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMediaSettings {
    endpoint: Option<String>,
    bucket: Option<String>,
    cache_dir: Option<PathBuf>,
    file_types_to_cache: Option<Vec<String>>,
    timeout_seconds: Option<u64>,
    route_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEventSettings {
    redis: RawRedisSettings,
    rabbit: RawRabbitSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    channel: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRabbitSettings {
    url: Option<String>,
    exchange: Option<String>,
    exchange_type: Option<String>,
    routing_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWebhookSettings {
    secret: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: Option<String>, key: &'static str) -> Result<Option<Url>, LoadError> {
    let Some(value) = non_empty(value) else {
        return Ok(None);
    };
    let url = Url::parse(&value)
        .map_err(|err| LoadError::invalid(key, format!("invalid URL `{value}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(Some(url)),
        scheme => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{scheme}`"),
        )),
    }
}

fn positive_seconds(
    value: Option<u64>,
    default: u64,
    key: &'static str,
) -> Result<Duration, LoadError> {
    match value.unwrap_or(default) {
        0 => Err(LoadError::invalid(key, "must be greater than zero")),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
