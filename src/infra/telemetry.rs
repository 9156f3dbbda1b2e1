use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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
///
/// Events go to stderr; worker stdout carries rebuild messages.
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
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
            "boardcache_rebuild_total",
            Unit::Count,
            "Total number of executed rebuilds, labelled by kind and outcome."
        );
        describe_histogram!(
            "boardcache_rebuild_ms",
            Unit::Milliseconds,
            "Rebuild latency in milliseconds."
        );
        describe_gauge!(
            "boardcache_rebuild_pending",
            Unit::Count,
            "Rebuild keys currently pending or executing."
        );
        describe_counter!(
            "boardcache_worker_restarts_total",
            Unit::Count,
            "Total number of worker processes restarted after an exit."
        );
        describe_counter!(
            "boardcache_spool_claimed_total",
            Unit::Count,
            "Total number of spooled commands claimed by workers."
        );
    });
}
