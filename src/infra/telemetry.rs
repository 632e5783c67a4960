use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "supercache_hit_total",
            Unit::Count,
            "Total number of pages served from the page cache."
        );
        describe_counter!(
            "supercache_miss_total",
            Unit::Count,
            "Total number of admitted requests that found no cached page."
        );
        describe_counter!(
            "supercache_not_cacheable_total",
            Unit::Count,
            "Total number of requests rejected by admission, labelled by reason."
        );
        describe_counter!(
            "supercache_capture_total",
            Unit::Count,
            "Total number of rendered pages written to the store, labelled by page type."
        );
        describe_counter!(
            "supercache_purge_total",
            Unit::Count,
            "Total number of scope purges issued by invalidation."
        );
        describe_counter!(
            "supercache_store_error_total",
            Unit::Count,
            "Total number of page store failures, labelled by operation."
        );
        describe_counter!(
            "supercache_store_evict_total",
            Unit::Count,
            "Total number of cached pages evicted due to capacity."
        );
        describe_counter!(
            "supercache_store_expired_total",
            Unit::Count,
            "Total number of cached pages dropped on read after their TTL."
        );
        describe_histogram!(
            "supercache_render_ms",
            Unit::Milliseconds,
            "Render time of captured pages in milliseconds."
        );
        describe_histogram!(
            "supercache_invalidate_ms",
            Unit::Milliseconds,
            "Invalidation batch latency in milliseconds."
        );
    });
}
