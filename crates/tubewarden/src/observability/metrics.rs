use super::GLOBAL_LABELS;
use crate::config::{from_env, ConfigError};
use crate::prelude::*;
use crate::Result;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use serde::Deserialize;

/// Histogram buckets to measure the distribution of request durations in seconds
pub(crate) const DEFAULT_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

pub(crate) const SUPERVISOR_LAUNCHES_TOTAL: &str = "tubewarden_supervisor_launches_total";
pub(crate) const SUPERVISOR_RESTARTS_TOTAL: &str = "tubewarden_supervisor_restarts_total";
pub(crate) const HEALTH_CHECKS_TOTAL: &str = "tubewarden_health_checks_total";
pub(crate) const HEALTH_CHECK_DURATION_SECONDS: &str = "tubewarden_health_check_duration_seconds";
pub(crate) const BACKUPS_TOTAL: &str = "tubewarden_backups_total";
pub(crate) const BACKUP_ARCHIVE_SIZE_BYTES: &str = "tubewarden_backup_archive_size_bytes";

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    /// Port of the Prometheus scrape endpoint. Metrics are not exported if unset.
    metrics_port: Option<u16>,
}

impl MetricsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        from_env("")
    }
}

pub fn init_metrics(config: MetricsConfig) -> Result {
    let Some(port) = config.metrics_port else {
        debug!("METRICS_PORT is not set, metrics exporter is disabled");
        return Ok(());
    };

    let mut builder = PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .set_buckets_for_metric(
            Matcher::Full(HEALTH_CHECK_DURATION_SECONDS.to_owned()),
            DEFAULT_DURATION_BUCKETS,
        )
        .fatal_ctx(|| "Invalid histogram buckets")?;

    for (key, value) in GLOBAL_LABELS {
        builder = builder.add_global_label(*key, *value);
    }

    builder
        .install()
        .fatal_ctx(|| format!("Failed to start the metrics listener on port {port}"))?;

    describe();

    info!(port, "Metrics exporter is listening");

    Ok(())
}

fn describe() {
    metrics::describe_counter!(
        SUPERVISOR_LAUNCHES_TOTAL,
        "Number of times the supervised process was launched"
    );
    metrics::describe_counter!(
        SUPERVISOR_RESTARTS_TOTAL,
        "Number of times the supervised process was restarted after it exited"
    );
    metrics::describe_counter!(
        HEALTH_CHECKS_TOTAL,
        "Number of identity checks against the Telegram Bot API by result"
    );
    metrics::describe_histogram!(
        HEALTH_CHECK_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Duration of a single identity check against the Telegram Bot API"
    );
    metrics::describe_counter!(BACKUPS_TOTAL, "Number of backup attempts by result");
    metrics::describe_gauge!(
        BACKUP_ARCHIVE_SIZE_BYTES,
        metrics::Unit::Bytes,
        "Size of the most recent backup archive"
    );
}
