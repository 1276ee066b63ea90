use std::sync::Once;

use metrics::{Unit, describe_counter};
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
            "newscache_cache_hit_total",
            Unit::Count,
            "Cache reads that found a fresh entry, labelled by cache."
        );
        describe_counter!(
            "newscache_cache_miss_total",
            Unit::Count,
            "Cache reads that found nothing usable, labelled by cache and reason."
        );
        describe_counter!(
            "newscache_cache_save_total",
            Unit::Count,
            "Cache entries written."
        );
        describe_counter!(
            "newscache_cache_swept_total",
            Unit::Count,
            "Expired cache entries deleted by sweeps."
        );
        describe_counter!(
            "newscache_flight_coalesced_total",
            Unit::Count,
            "Callers that joined an in-flight computation instead of starting one."
        );
        describe_counter!(
            "newscache_rate_limited_total",
            Unit::Count,
            "Requests rejected by a quota, labelled by subject kind."
        );
    });
}
