//! Monitoring Loop
//!
//! Samples cache health on a fixed tick and raises tiered alerts:
//!
//! ```text
//! tick ──► collect (per metric, independent) ──► evaluate (critical, then warning)
//!                                                     │
//!                                        alerts ◄─────┘
//!      ──► prune (sample window, alert window)
//! ```
//!
//! Alerting is level-triggered: a metric outside its bounds raises one
//! alert per tick for as long as it stays there. A metric that returns to
//! `ok` raises a single INFO recovery alert.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::history::{window_start, Alert, AlertLevel, MetricHistory, MetricSample};
use super::thresholds::{MetricStatus, MonitoredMetric, ThresholdConfig, ThresholdUpdate};
use crate::cache::{percentage, MetadataCache};
use crate::config::MonitoringSettings;
use crate::error::Result;

/// Sample name for request volume (no thresholds)
pub const TOTAL_REQUESTS: &str = "total_requests";

// =============================================================================
// Snapshot Types
// =============================================================================

/// Latest value of one metric with its status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub value: f64,
    pub status: MetricStatus,
    pub timestamp: DateTime<Utc>,
}

/// Result of `current_metrics()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, MetricReading>,
    /// Worst status across all metrics
    pub overall: MetricStatus,
}

impl MetricsSnapshot {
    pub fn status_of(&self, metric: MonitoredMetric) -> Option<MetricStatus> {
        self.metrics.get(metric.name()).map(|r| r.status)
    }
}

/// Actionable advice derived from a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Metric the advice is about; `None` for the all-clear
    pub metric: Option<String>,
    pub severity: MetricStatus,
    pub message: String,
}

/// Loop bookkeeping for health and admin reads
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub ticks: u64,
    pub last_tick: Option<DateTime<Utc>>,
    pub samples: usize,
    pub alerts: usize,
}

// =============================================================================
// Shared State
// =============================================================================

struct Shared {
    cache: Arc<MetadataCache>,
    thresholds: RwLock<ThresholdConfig>,
    history: RwLock<MetricHistory>,
    last_status: Mutex<HashMap<MonitoredMetric, MetricStatus>>,
    max_memory_bytes: u64,
    ticks: AtomicU64,
    last_tick: RwLock<Option<DateTime<Utc>>>,
}

impl Shared {
    /// Read counters and the backend, one sample per available metric.
    async fn collect(&self) -> Vec<(MonitoredMetric, MetricSample)> {
        let now = Utc::now();
        let stats = self.cache.stats();
        let total = stats.hits + stats.misses;
        let mut collected = Vec::new();

        self.history
            .write()
            .push_sample(MetricSample::new(TOTAL_REQUESTS, total as f64).at(now));

        // Rates are undefined without traffic
        if total > 0 {
            collected.push((MonitoredMetric::HitRate, stats.hit_rate));
            collected.push((MonitoredMetric::ErrorRate, stats.error_rate));
            collected.push((MonitoredMetric::ResponseTime, stats.avg_response_ms));
        } else {
            debug!("No requests yet; skipping rate metrics");
        }

        match self.cache.store().memory_used().await {
            Ok(Some(bytes)) => {
                let usage = percentage(bytes, self.max_memory_bytes);
                collected.push((MonitoredMetric::MemoryUsage, usage));
            }
            Ok(None) => debug!("Backend does not report memory usage"),
            Err(e) => warn!(metric = "memory_usage", error = %e, "Metric collection failed"),
        }

        collected
            .into_iter()
            .map(|(metric, value)| {
                let sample = MetricSample::new(metric.name(), value)
                    .at(now)
                    .tag("backend", self.cache.store().backend_name());
                (metric, sample)
            })
            .collect()
    }

    /// Compare this tick's samples against the thresholds.
    fn evaluate(&self, samples: &[(MonitoredMetric, MetricSample)]) -> Vec<Alert> {
        let thresholds = self.thresholds.read().clone();
        let mut last_status = self.last_status.lock();
        let mut alerts = Vec::new();

        for (metric, sample) in samples {
            let status = thresholds.evaluate(*metric, sample.value);
            let previous = last_status.insert(*metric, status).unwrap_or(MetricStatus::Ok);

            let alert = match status {
                MetricStatus::Critical | MetricStatus::Warning => {
                    let level = if status == MetricStatus::Critical {
                        AlertLevel::Critical
                    } else {
                        AlertLevel::Warning
                    };
                    let threshold = thresholds.threshold_for(*metric, status).unwrap_or_default();
                    Some(Alert::new(
                        level,
                        metric.name(),
                        sample.value,
                        threshold,
                        crossing_message(*metric, status, sample.value, threshold),
                    ))
                }
                MetricStatus::Ok if previous != MetricStatus::Ok => {
                    let threshold = thresholds.threshold_for(*metric, previous).unwrap_or_default();
                    Some(Alert::new(
                        AlertLevel::Info,
                        metric.name(),
                        sample.value,
                        threshold,
                        format!(
                            "{} recovered to {:.2}{} (was {})",
                            metric,
                            sample.value,
                            metric.unit(),
                            previous
                        ),
                    ))
                }
                MetricStatus::Ok => None,
            };

            if let Some(alert) = alert {
                log_alert(&alert);
                alerts.push(alert);
            }
        }
        alerts
    }

    async fn tick(&self) -> Vec<Alert> {
        let samples = self.collect().await;
        let alerts = self.evaluate(&samples);

        let (samples_removed, alerts_removed) = {
            let mut history = self.history.write();
            for (_, sample) in samples {
                history.push_sample(sample);
            }
            for alert in &alerts {
                history.push_alert(alert.clone());
            }
            history.prune(Utc::now())
        };

        self.ticks.fetch_add(1, Ordering::Relaxed);
        *self.last_tick.write() = Some(Utc::now());
        debug!(
            alerts = alerts.len(),
            samples_removed, alerts_removed, "Monitoring tick complete"
        );
        alerts
    }
}

fn crossing_message(metric: MonitoredMetric, status: MetricStatus, value: f64, threshold: f64) -> String {
    let direction = if metric.lower_is_worse() { "below" } else { "at or above" };
    format!(
        "{} {}: {:.2}{} is {} {:.2}{}",
        metric,
        status,
        value,
        metric.unit(),
        direction,
        threshold,
        metric.unit()
    )
}

fn log_alert(alert: &Alert) {
    match alert.level {
        AlertLevel::Info => info!(
            metric = %alert.metric_name,
            value = alert.current_value,
            threshold = alert.threshold,
            "{}",
            alert.message
        ),
        AlertLevel::Warning => warn!(
            metric = %alert.metric_name,
            value = alert.current_value,
            threshold = alert.threshold,
            "{}",
            alert.message
        ),
        AlertLevel::Critical => error!(
            metric = %alert.metric_name,
            value = alert.current_value,
            threshold = alert.threshold,
            "{}",
            alert.message
        ),
    }
}

fn advice(metric: MonitoredMetric, reading: &MetricReading) -> String {
    let value = reading.value;
    match metric {
        MonitoredMetric::HitRate => format!(
            "Hit rate is {:.1}%: raise TTLs for frequently read kinds or increase warming candidate limits",
            value
        ),
        MonitoredMetric::ErrorRate => format!(
            "Error rate is {:.1}%: investigate backend connectivity and loader health",
            value
        ),
        MonitoredMetric::MemoryUsage => format!(
            "Memory usage is {:.1}%: shorten aggregate list TTLs or provision more backend memory",
            value
        ),
        MonitoredMetric::ResponseTime => format!(
            "Average response time is {:.1}ms: check backend latency and the network path to it",
            value
        ),
    }
}

// =============================================================================
// Monitoring Loop
// =============================================================================

struct LoopTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the monitoring task and the metric/alert history
pub struct MonitoringLoop {
    shared: Arc<Shared>,
    running: AtomicBool,
    task: Mutex<Option<LoopTask>>,
}

impl MonitoringLoop {
    pub fn new(
        cache: Arc<MetadataCache>,
        thresholds: ThresholdConfig,
        settings: &MonitoringSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache,
                thresholds: RwLock::new(thresholds),
                history: RwLock::new(MetricHistory::new(
                    settings.metric_retention,
                    settings.alert_retention,
                )),
                last_status: Mutex::new(HashMap::new()),
                max_memory_bytes: settings.max_memory_bytes.max(1),
                ticks: AtomicU64::new(0),
                last_tick: RwLock::new(None),
            }),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the loop task. A second call is a no-op.
    pub fn start(&self, interval: Duration) {
        if interval.is_zero() {
            warn!("Refusing to start monitoring with a zero interval");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Monitoring loop already running");
            return;
        }

        let token = CancellationToken::new();
        let shared = self.shared.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if loop_token.is_cancelled() {
                    break;
                }
                shared.tick().await;
            }
            info!("Monitoring loop stopped");
        });

        *self.task.lock() = Some(LoopTask { token, handle });
        info!(interval_secs = interval.as_secs(), "Monitoring loop started");
    }

    /// Cancel the loop task and wait for it.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Monitoring loop not running");
            return;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.token.cancel();
            if let Err(e) = task.handle.await {
                error!(error = %e, "Monitoring task failed");
            }
        }
    }

    /// Run one collect, evaluate, prune pass now. Returns the alerts raised.
    pub async fn tick(&self) -> Vec<Alert> {
        self.shared.tick().await
    }

    /// Append a sample directly, e.g. to backfill history.
    pub fn record_sample(&self, sample: MetricSample) {
        self.shared.history.write().push_sample(sample);
    }

    /// Latest sample of each metric with its current status.
    ///
    /// Readings the latest tick did not refresh are left out, e.g. rates
    /// after `reset_stats` until traffic resumes.
    pub fn current_metrics(&self) -> MetricsSnapshot {
        let thresholds = self.shared.thresholds.read().clone();
        let history = self.shared.history.read();
        let mut metrics = BTreeMap::new();
        let mut overall = MetricStatus::Ok;
        let last_tick = history.latest(TOTAL_REQUESTS).map(|s| s.timestamp);

        for metric in MonitoredMetric::ALL {
            let current = history
                .latest(metric.name())
                .filter(|s| last_tick.map_or(true, |tick| s.timestamp >= tick));
            if let Some(sample) = current {
                let status = thresholds.evaluate(metric, sample.value);
                overall = overall.max(status);
                metrics.insert(
                    metric.name().to_string(),
                    MetricReading {
                        value: sample.value,
                        status,
                        timestamp: sample.timestamp,
                    },
                );
            }
        }
        if let Some(sample) = history.latest(TOTAL_REQUESTS) {
            metrics.insert(
                TOTAL_REQUESTS.to_string(),
                MetricReading {
                    value: sample.value,
                    status: MetricStatus::Ok,
                    timestamp: sample.timestamp,
                },
            );
        }

        MetricsSnapshot {
            timestamp: Utc::now(),
            metrics,
            overall,
        }
    }

    /// Samples from the last `hours`, optionally for one metric.
    pub fn history(&self, name: Option<&str>, hours: u32) -> Vec<MetricSample> {
        let since = window_start(Utc::now(), ChronoDuration::hours(i64::from(hours)));
        self.shared.history.read().samples(name, since)
    }

    /// Alerts from the last `hours`, optionally of one level.
    pub fn alerts(&self, level: Option<AlertLevel>, hours: u32) -> Vec<Alert> {
        let since = window_start(Utc::now(), ChronoDuration::hours(i64::from(hours)));
        self.shared.history.read().alerts(level, since)
    }

    /// Advice derived only from `current_metrics()`.
    pub fn recommendations(&self) -> Vec<Recommendation> {
        recommendations_for(&self.current_metrics())
    }

    pub fn thresholds(&self) -> ThresholdConfig {
        self.shared.thresholds.read().clone()
    }

    /// Merge a partial update into the thresholds. Nothing changes on error.
    pub fn update_thresholds(&self, update: &ThresholdUpdate) -> Result<ThresholdConfig> {
        let mut thresholds = self.shared.thresholds.write();
        let next = thresholds.merged(update)?;
        *thresholds = next.clone();
        info!(?update, "Alert thresholds updated");
        Ok(next)
    }

    pub fn status(&self) -> MonitorStatus {
        let history = self.shared.history.read();
        MonitorStatus {
            running: self.is_running(),
            ticks: self.shared.ticks.load(Ordering::Relaxed),
            last_tick: *self.shared.last_tick.read(),
            samples: history.sample_count(),
            alerts: history.alert_count(),
        }
    }
}

/// Pure mapping from a snapshot to advice.
pub fn recommendations_for(snapshot: &MetricsSnapshot) -> Vec<Recommendation> {
    let mut out: Vec<Recommendation> = MonitoredMetric::ALL
        .into_iter()
        .filter_map(|metric| {
            let reading = snapshot.metrics.get(metric.name())?;
            (reading.status != MetricStatus::Ok).then(|| Recommendation {
                metric: Some(metric.name().to_string()),
                severity: reading.status,
                message: advice(metric, reading),
            })
        })
        .collect();

    // Critical first, then metric order
    out.sort_by(|a, b| b.severity.cmp(&a.severity));

    if out.is_empty() {
        out.push(Recommendation {
            metric: None,
            severity: MetricStatus::Ok,
            message: "Cache performance is within all configured thresholds".to_string(),
        });
    }
    out
}

impl Drop for MonitoringLoop {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.token.cancel();
        }
    }
}

impl std::fmt::Debug for MonitoringLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringLoop")
            .field("status", &self.status())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, KeyCodec, TtlPolicy};
    use crate::domain::{EntityKind, Loader, QueryCriteria, Record};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoLoader;

    #[async_trait]
    impl Loader for EchoLoader {
        async fn fetch(&self, _kind: EntityKind, id: &str) -> Result<Option<Record>> {
            Ok(Some(json!({ "title": id })))
        }

        async fn query(
            &self,
            _kind: EntityKind,
            _criteria: &QueryCriteria,
            _limit: usize,
        ) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    fn monitor() -> (MonitoringLoop, Arc<MetadataCache>) {
        let cache = Arc::new(MetadataCache::new(
            KeyCodec::new("t"),
            Arc::new(CacheStore::in_memory()),
            Arc::new(EchoLoader),
            TtlPolicy::default(),
        ));
        let monitor = MonitoringLoop::new(
            cache.clone(),
            ThresholdConfig::default(),
            &MonitoringSettings::default(),
        );
        (monitor, cache)
    }

    fn snapshot(readings: &[(MonitoredMetric, f64, MetricStatus)]) -> MetricsSnapshot {
        let now = Utc::now();
        MetricsSnapshot {
            timestamp: now,
            metrics: readings
                .iter()
                .map(|(m, value, status)| {
                    (
                        m.name().to_string(),
                        MetricReading {
                            value: *value,
                            status: *status,
                            timestamp: now,
                        },
                    )
                })
                .collect(),
            overall: readings.iter().map(|r| r.2).max().unwrap_or(MetricStatus::Ok),
        }
    }

    #[tokio::test]
    async fn test_tick_without_traffic_raises_nothing() {
        let (monitor, _) = monitor();
        let alerts = monitor.tick().await;
        assert!(alerts.is_empty());

        let current = monitor.current_metrics();
        assert!(current.metrics.contains_key(TOTAL_REQUESTS));
        assert!(current.metrics.contains_key("memory_usage"));
        assert!(!current.metrics.contains_key("hit_rate"));
        assert_eq!(current.overall, MetricStatus::Ok);
        assert_eq!(monitor.status().ticks, 1);
    }

    #[tokio::test]
    async fn test_level_triggered_and_recovery() {
        let (monitor, cache) = monitor();

        // 1 hit / 1 miss = 50% hit rate: warning (70/50 thresholds)
        cache.get(EntityKind::Video, "v1").await;
        cache.get(EntityKind::Video, "v1").await;
        for _ in 0..2 {
            let alerts = monitor.tick().await;
            let hit: Vec<_> = alerts.iter().filter(|a| a.metric_name == "hit_rate").collect();
            assert_eq!(hit.len(), 1);
            assert_eq!(hit[0].level, AlertLevel::Warning);
            assert_eq!(hit[0].threshold, 70.0);
        }

        for _ in 0..8 {
            cache.get(EntityKind::Video, "v1").await;
        }
        let alerts = monitor.tick().await;
        let hit: Vec<_> = alerts.iter().filter(|a| a.metric_name == "hit_rate").collect();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].level, AlertLevel::Info);

        // Recovery alert fires once
        let alerts = monitor.tick().await;
        assert!(alerts.iter().all(|a| a.metric_name != "hit_rate"));
        assert_eq!(monitor.alerts(Some(AlertLevel::Info), 1).len(), 1);
    }

    #[tokio::test]
    async fn test_reset_stats_clears_stale_rates() {
        let (monitor, cache) = monitor();

        // 1 hit / 3 misses = 25% hit rate: critical
        for id in ["v1", "v2", "v3"] {
            cache.get(EntityKind::Video, id).await;
        }
        cache.get(EntityKind::Video, "v1").await;
        monitor.tick().await;
        assert_eq!(monitor.current_metrics().overall, MetricStatus::Critical);
        assert_eq!(monitor.recommendations()[0].metric.as_deref(), Some("hit_rate"));

        cache.reset_stats();
        assert!(monitor.tick().await.is_empty());

        let current = monitor.current_metrics();
        assert!(current.status_of(MonitoredMetric::HitRate).is_none());
        assert!(current.status_of(MonitoredMetric::ErrorRate).is_none());
        assert_eq!(current.metrics[TOTAL_REQUESTS].value, 0.0);
        assert_eq!(current.overall, MetricStatus::Ok);
        let recommendations = monitor.recommendations();
        assert_eq!(recommendations.len(), 1);
        assert_eq!(recommendations[0].metric, None);

        // Stale samples stay in history
        assert_eq!(monitor.history(Some("hit_rate"), 1).len(), 1);
    }

    #[tokio::test]
    async fn test_history_and_alerts_accept_any_window() {
        let (monitor, cache) = monitor();
        cache.get(EntityKind::Video, "v1").await;
        cache.get(EntityKind::Video, "v2").await;
        monitor.tick().await;

        assert!(!monitor.history(None, u32::MAX).is_empty());
        assert_eq!(monitor.alerts(None, u32::MAX).len(), 1);
    }

    #[tokio::test]
    async fn test_tick_with_oversized_retention() {
        let cache = Arc::new(MetadataCache::new(
            KeyCodec::new("t"),
            Arc::new(CacheStore::in_memory()),
            Arc::new(EchoLoader),
            TtlPolicy::default(),
        ));
        let settings = MonitoringSettings {
            metric_retention: Duration::from_secs(100_000_000 * 86_400),
            alert_retention: Duration::from_secs(100_000_000 * 86_400),
            ..MonitoringSettings::default()
        };
        let monitor = MonitoringLoop::new(cache, ThresholdConfig::default(), &settings);

        monitor.tick().await;
        monitor.tick().await;
        assert_eq!(monitor.status().ticks, 2);
    }

    #[tokio::test]
    async fn test_update_thresholds() {
        let (monitor, _) = monitor();

        let updated = monitor
            .update_thresholds(&ThresholdUpdate {
                hit_rate_warning: Some(90.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.hit_rate_warning, 90.0);

        let rejected = monitor.update_thresholds(&ThresholdUpdate {
            hit_rate_critical: Some(95.0),
            ..Default::default()
        });
        assert_matches!(rejected, Err(crate::error::Error::ConfigValidation(_)));
        assert_eq!(monitor.thresholds().hit_rate_critical, 50.0);
    }

    #[test]
    fn test_recommendations_are_a_function_of_snapshot() {
        let all_clear = recommendations_for(&snapshot(&[(
            MonitoredMetric::HitRate,
            90.0,
            MetricStatus::Ok,
        )]));
        assert_eq!(all_clear.len(), 1);
        assert_eq!(all_clear[0].metric, None);

        let snap = snapshot(&[
            (MonitoredMetric::HitRate, 60.0, MetricStatus::Warning),
            (MonitoredMetric::ErrorRate, 20.0, MetricStatus::Critical),
        ]);
        let first = recommendations_for(&snap);
        assert_eq!(first, recommendations_for(&snap));
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].metric.as_deref(), Some("error_rate"));
        assert!(first[0].message.contains("backend connectivity"));
        assert!(first[1].message.contains("TTL"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop() {
        let (monitor, _) = monitor();

        monitor.start(Duration::from_secs(60));
        monitor.start(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(150)).await;
        monitor.stop().await;

        // Ticks at 0s, 60s and 120s
        assert_eq!(monitor.status().ticks, 3);
        assert!(!monitor.is_running());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(monitor.status().ticks, 3);
    }
}
