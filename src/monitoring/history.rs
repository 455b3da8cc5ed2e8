//! Metric and Alert History
//!
//! Append-only, time-ordered windows of samples and alerts. Only the
//! monitoring loop appends and prunes; readers take copies.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hard cap on retained samples, independent of the time window.
pub const MAX_SAMPLES: usize = 100_000;

/// Hard cap on retained alerts.
pub const MAX_ALERTS: usize = 10_000;

/// One observation of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            name: name.into(),
            value,
            tags: BTreeMap::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "INFO"),
            AlertLevel::Warning => write!(f, "WARNING"),
            AlertLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A recorded threshold crossing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: AlertLevel,
    pub message: String,
    pub metric_name: String,
    pub current_value: f64,
    /// Boundary that was crossed; for recoveries, the one recovered from
    pub threshold: f64,
}

impl Alert {
    pub fn new(
        level: AlertLevel,
        metric_name: impl Into<String>,
        current_value: f64,
        threshold: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            metric_name: metric_name.into(),
            current_value,
            threshold,
        }
    }
}

/// Bounded sample and alert windows
#[derive(Debug)]
pub struct MetricHistory {
    samples: VecDeque<MetricSample>,
    alerts: VecDeque<Alert>,
    metric_retention: ChronoDuration,
    alert_retention: ChronoDuration,
}

impl MetricHistory {
    pub fn new(metric_retention: std::time::Duration, alert_retention: std::time::Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            alerts: VecDeque::new(),
            metric_retention: to_chrono(metric_retention),
            alert_retention: to_chrono(alert_retention),
        }
    }

    /// Append a sample, keeping the window time-ordered.
    pub fn push_sample(&mut self, sample: MetricSample) {
        let position = self
            .samples
            .iter()
            .rposition(|s| s.timestamp <= sample.timestamp)
            .map_or(0, |i| i + 1);
        self.samples.insert(position, sample);
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    pub fn push_alert(&mut self, alert: Alert) {
        self.alerts.push_back(alert);
        while self.alerts.len() > MAX_ALERTS {
            self.alerts.pop_front();
        }
    }

    /// Drop samples and alerts older than their windows. Returns
    /// `(samples_removed, alerts_removed)`.
    pub fn prune(&mut self, now: DateTime<Utc>) -> (usize, usize) {
        let sample_cutoff = window_start(now, self.metric_retention);
        let before = self.samples.len();
        while self
            .samples
            .front()
            .map_or(false, |s| s.timestamp < sample_cutoff)
        {
            self.samples.pop_front();
        }
        let samples_removed = before - self.samples.len();

        let alert_cutoff = window_start(now, self.alert_retention);
        let before = self.alerts.len();
        self.alerts.retain(|a| a.timestamp >= alert_cutoff);
        (samples_removed, before - self.alerts.len())
    }

    /// Most recent sample of a metric.
    pub fn latest(&self, name: &str) -> Option<&MetricSample> {
        self.samples.iter().rev().find(|s| s.name == name)
    }

    /// Samples at or after `since`, optionally for one metric.
    pub fn samples(&self, name: Option<&str>, since: DateTime<Utc>) -> Vec<MetricSample> {
        self.samples
            .iter()
            .filter(|s| s.timestamp >= since && name.map_or(true, |n| s.name == n))
            .cloned()
            .collect()
    }

    /// Alerts at or after `since`, optionally of one level.
    pub fn alerts(&self, level: Option<AlertLevel>, since: DateTime<Utc>) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|a| a.timestamp >= since && level.map_or(true, |l| a.level == l))
            .cloned()
            .collect()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.len()
    }
}

/// Start of a window of length `window` ending at `now`, clamped to the
/// earliest representable time.
pub fn window_start(now: DateTime<Utc>, window: ChronoDuration) -> DateTime<Utc> {
    now.checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn to_chrono(duration: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(365 * 100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn history() -> MetricHistory {
        MetricHistory::new(Duration::from_secs(24 * 3600), Duration::from_secs(7 * 24 * 3600))
    }

    #[test]
    fn test_prune_by_retention() {
        let mut history = history();
        let now = Utc::now();
        for hours_ago in 0..30 {
            history.push_sample(
                MetricSample::new("hit_rate", 80.0).at(now - ChronoDuration::hours(hours_ago)),
            );
        }
        assert_eq!(history.sample_count(), 30);

        let (removed, _) = history.prune(now);
        assert_eq!(removed, 5);
        let cutoff = now - ChronoDuration::hours(24);
        assert!(history
            .samples(None, now - ChronoDuration::hours(48))
            .iter()
            .all(|s| s.timestamp >= cutoff));
    }

    #[test]
    fn test_prune_with_oversized_window_keeps_everything() {
        // 100 million days reaches past the earliest representable time
        let huge = Duration::from_secs(100_000_000 * 86_400);
        let mut history = MetricHistory::new(huge, huge);
        let now = Utc::now();
        history.push_sample(MetricSample::new("hit_rate", 80.0).at(now - ChronoDuration::days(400)));
        history.push_alert(Alert::new(AlertLevel::Info, "hit_rate", 80.0, 70.0, "recovered"));

        assert_eq!(history.prune(now), (0, 0));
        assert_eq!(history.sample_count(), 1);
        assert_eq!(history.alert_count(), 1);
    }

    #[test]
    fn test_window_start_clamps() {
        let now = Utc::now();
        assert_eq!(window_start(now, ChronoDuration::hours(1)), now - ChronoDuration::hours(1));
        assert_eq!(
            window_start(now, ChronoDuration::hours(i64::from(u32::MAX))),
            DateTime::<Utc>::MIN_UTC
        );
    }

    #[test]
    fn test_out_of_order_insert() {
        let mut history = history();
        let now = Utc::now();
        history.push_sample(MetricSample::new("a", 1.0).at(now));
        history.push_sample(MetricSample::new("a", 2.0).at(now - ChronoDuration::hours(1)));

        assert_eq!(history.latest("a").unwrap().value, 1.0);
        let samples = history.samples(Some("a"), now - ChronoDuration::hours(2));
        assert_eq!(samples[0].value, 2.0);
    }

    #[test]
    fn test_alert_filters() {
        let mut history = history();
        history.push_alert(Alert::new(AlertLevel::Warning, "hit_rate", 60.0, 70.0, "low"));
        history.push_alert(Alert::new(AlertLevel::Critical, "hit_rate", 40.0, 50.0, "very low"));

        let since = Utc::now() - ChronoDuration::hours(1);
        assert_eq!(history.alerts(None, since).len(), 2);
        assert_eq!(history.alerts(Some(AlertLevel::Critical), since).len(), 1);
        assert_eq!(history.alerts(Some(AlertLevel::Info), since).len(), 0);
    }

    #[test]
    fn test_level_serialization() {
        assert_eq!(serde_json::to_string(&AlertLevel::Critical).unwrap(), "\"CRITICAL\"");
        assert_eq!(AlertLevel::Warning.to_string(), "WARNING");
    }
}
