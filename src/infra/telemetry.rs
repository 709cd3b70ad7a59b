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
            "plaza_feed_cache_lookup_total",
            Unit::Count,
            "Feed reads by feed kind and cache hit classification."
        );
        describe_counter!(
            "plaza_feed_population_total",
            Unit::Count,
            "Background feed population attempts by outcome."
        );
        describe_histogram!(
            "plaza_feed_request_ms",
            Unit::Milliseconds,
            "End-to-end feed request latency in milliseconds."
        );
        describe_counter!(
            "plaza_enrich_degraded_total",
            Unit::Count,
            "Enrichment fields that fell back to defaults after a collaborator failure."
        );
        describe_counter!(
            "plaza_cache_insert_total",
            Unit::Count,
            "Write-path cache updates by feed kind and outcome."
        );
        describe_counter!(
            "plaza_cache_trim_total",
            Unit::Count,
            "Feed caches trimmed back to their cap."
        );
        describe_counter!(
            "plaza_popular_rebuild_total",
            Unit::Count,
            "Popularity snapshots rebuilt by scope kind and outcome."
        );
    });
}
