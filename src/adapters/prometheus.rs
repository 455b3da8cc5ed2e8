//! Prometheus Exposition
//!
//! Renders engine state in the Prometheus text format. Values are read
//! from the engine on every scrape; the exporter keeps no state of its own
//! beyond the registered collectors.

use ::prometheus::{Encoder, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::admin::CacheEngine;
use crate::error::{Error, Result};
use crate::monitoring::{AlertLevel, MetricStatus};

/// Alert window reported by `metacache_alerts`
const ALERT_WINDOW_HOURS: u32 = 24;

/// Collectors for one engine, in a private registry
pub struct PrometheusExporter {
    registry: Registry,
    cache_ops: IntGaugeVec,
    backend_errors: IntGauge,
    corrupt_entries: IntGauge,
    warms_in_progress: IntGauge,
    metric_value: GaugeVec,
    metric_status: IntGaugeVec,
    alerts: IntGaugeVec,
    warming_running: IntGaugeVec,
    warming_runs: IntGaugeVec,
    warming_warmed: IntGaugeVec,
    warming_failures: IntGaugeVec,
    monitor_ticks: IntGauge,
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let gauge = IntGauge::new(name, help).map_err(registration_error)?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(registration_error)?;
    Ok(gauge)
}

fn int_gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntGaugeVec> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), labels).map_err(registration_error)?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(registration_error)?;
    Ok(gauge)
}

fn registration_error(e: ::prometheus::Error) -> Error {
    Error::Internal(format!("Failed to register metric: {}", e))
}

fn status_code(status: MetricStatus) -> i64 {
    match status {
        MetricStatus::Ok => 0,
        MetricStatus::Warning => 1,
        MetricStatus::Critical => 2,
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("metacache".to_string()), None)
            .map_err(registration_error)?;

        let metric_value = GaugeVec::new(
            Opts::new("metric_value", "Latest monitored value per metric"),
            &["metric"],
        )
        .map_err(registration_error)?;
        registry
            .register(Box::new(metric_value.clone()))
            .map_err(registration_error)?;

        Ok(Self {
            cache_ops: int_gauge_vec(
                &registry,
                "cache_operations",
                "Cache counters since the last reset",
                &["op"],
            )?,
            backend_errors: int_gauge(
                &registry,
                "backend_errors",
                "Key-value backend failures absorbed by the cache",
            )?,
            corrupt_entries: int_gauge(
                &registry,
                "corrupt_entries",
                "Cached values evicted because they failed to decode",
            )?,
            warms_in_progress: int_gauge(
                &registry,
                "warms_in_progress",
                "Keys currently being warmed",
            )?,
            metric_value,
            metric_status: int_gauge_vec(
                &registry,
                "metric_status",
                "Threshold status per metric (0 ok, 1 warning, 2 critical)",
                &["metric"],
            )?,
            alerts: int_gauge_vec(
                &registry,
                "alerts",
                "Alerts raised in the last 24 hours",
                &["level"],
            )?,
            warming_running: int_gauge_vec(
                &registry,
                "warming_running",
                "Whether a strategy loop is alive",
                &["strategy"],
            )?,
            warming_runs: int_gauge_vec(
                &registry,
                "warming_runs",
                "Completed warming iterations",
                &["strategy"],
            )?,
            warming_warmed: int_gauge_vec(
                &registry,
                "warming_warmed",
                "Ids warmed",
                &["strategy"],
            )?,
            warming_failures: int_gauge_vec(
                &registry,
                "warming_failures",
                "Candidate selections that failed",
                &["strategy"],
            )?,
            monitor_ticks: int_gauge(&registry, "monitor_ticks", "Monitoring ticks completed")?,
            registry,
        })
    }

    /// Refresh every collector from the engine.
    pub fn update(&self, engine: &CacheEngine) {
        let stats = engine.stats();
        for (op, value) in [
            ("hits", stats.hits),
            ("misses", stats.misses),
            ("sets", stats.sets),
            ("errors", stats.errors),
            ("invalidations", stats.invalidations),
            ("loads", stats.loads),
        ] {
            self.cache_ops
                .with_label_values(&[op])
                .set(saturating_i64(value));
        }

        let cache = engine.cache();
        self.backend_errors
            .set(saturating_i64(cache.store().error_count()));
        self.corrupt_entries
            .set(saturating_i64(cache.store().corrupt_count()));
        self.warms_in_progress
            .set(i64::try_from(cache.warms_in_progress()).unwrap_or(i64::MAX));

        let snapshot = engine.metrics();
        for (name, reading) in &snapshot.metrics {
            self.metric_value
                .with_label_values(&[name.as_str()])
                .set(reading.value);
            self.metric_status
                .with_label_values(&[name.as_str()])
                .set(status_code(reading.status));
        }

        let alerts = engine.alerts(None, ALERT_WINDOW_HOURS);
        for level in [AlertLevel::Info, AlertLevel::Warning, AlertLevel::Critical] {
            let count = alerts.iter().filter(|a| a.level == level).count();
            self.alerts
                .with_label_values(&[level.to_string().as_str()])
                .set(i64::try_from(count).unwrap_or(i64::MAX));
        }

        for status in engine.warming_status() {
            let name = status.config.name.as_str();
            self.warming_running
                .with_label_values(&[name])
                .set(i64::from(status.running));
            self.warming_runs
                .with_label_values(&[name])
                .set(saturating_i64(status.runs));
            self.warming_warmed
                .with_label_values(&[name])
                .set(saturating_i64(status.warmed));
            self.warming_failures
                .with_label_values(&[name])
                .set(saturating_i64(status.failures));
        }

        self.monitor_ticks
            .set(saturating_i64(engine.monitor_status().ticks));
    }

    /// Refresh and encode in the text exposition format.
    pub fn render(&self, engine: &CacheEngine) -> Result<String> {
        self.update(engine);

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Internal(format!("Metrics contain invalid UTF-8: {}", e)))
    }

    /// Content type for the `/metrics` response.
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter").finish_non_exhaustive()
    }
}
