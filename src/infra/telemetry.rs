use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Broker and HTTP client internals are noisy below `warn`.
const QUIET_TARGETS: [&str; 4] = ["lapin", "amq_protocol", "redis", "hyper_util"];

/// Install the global subscriber for `logging`. `RUST_LOG` overrides the
/// configured level when set.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let output = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter(logging.level))
        .with(ErrorLayer::default())
        .with(output)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return filter;
    }
    QUIET_TARGETS.iter().fold(filter, |filter, target| {
        match format!("{target}=warn").parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        }
    })
}

/// Register descriptions for every metric the service emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "vitrine_cache_hit_total",
            Unit::Count,
            "Lookups answered from a cache entry."
        );
        describe_counter!(
            "vitrine_cache_miss_total",
            Unit::Count,
            "Lookups that found no cache entry."
        );
        describe_counter!(
            "vitrine_cache_coalesced_total",
            Unit::Count,
            "Misses served by waiting on another request's computation."
        );
        describe_counter!(
            "vitrine_cache_fallback_total",
            Unit::Count,
            "Waiters that produced on their own after the wait budget or a failed owner."
        );
        describe_counter!(
            "vitrine_cache_producer_failed_total",
            Unit::Count,
            "Producer invocations that returned an error."
        );
        describe_counter!(
            "vitrine_cache_invalidate_total",
            Unit::Count,
            "Cache entries removed by selective invalidation."
        );
        describe_counter!(
            "vitrine_cache_clear_total",
            Unit::Count,
            "Full cache clears."
        );
        describe_counter!(
            "vitrine_events_received_total",
            Unit::Count,
            "Invalidation payloads received from a transport."
        );
        describe_counter!(
            "vitrine_events_dropped_total",
            Unit::Count,
            "Invalidation payloads dropped, labelled by reason: decode or overflow."
        );
    });
}
