//! Alert Thresholds
//!
//! Warning/critical boundaries per monitored metric, and the pure
//! comparison used both by the monitoring tick and by on-demand snapshots.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Metrics that carry thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoredMetric {
    HitRate,
    ErrorRate,
    MemoryUsage,
    ResponseTime,
}

impl MonitoredMetric {
    pub const ALL: [MonitoredMetric; 4] = [
        MonitoredMetric::HitRate,
        MonitoredMetric::ErrorRate,
        MonitoredMetric::MemoryUsage,
        MonitoredMetric::ResponseTime,
    ];

    /// Sample name used in history and alerts.
    pub fn name(&self) -> &'static str {
        match self {
            MonitoredMetric::HitRate => "hit_rate",
            MonitoredMetric::ErrorRate => "error_rate",
            MonitoredMetric::MemoryUsage => "memory_usage",
            MonitoredMetric::ResponseTime => "response_time_ms",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// True when a smaller value is worse.
    pub fn lower_is_worse(&self) -> bool {
        matches!(self, MonitoredMetric::HitRate)
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MonitoredMetric::ResponseTime => "ms",
            _ => "%",
        }
    }
}

impl std::fmt::Display for MonitoredMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Qualitative state of one metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Ok,
    Warning,
    Critical,
}

impl std::fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricStatus::Ok => write!(f, "ok"),
            MetricStatus::Warning => write!(f, "warning"),
            MetricStatus::Critical => write!(f, "critical"),
        }
    }
}

// =============================================================================
// Threshold Configuration
// =============================================================================

/// Warning and critical boundaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdConfig {
    /// Percent; alert below
    pub hit_rate_warning: f64,
    pub hit_rate_critical: f64,
    /// Percent; alert at or above
    pub error_rate_warning: f64,
    pub error_rate_critical: f64,
    /// Percent of `max_memory_bytes`; alert at or above
    pub memory_usage_warning: f64,
    pub memory_usage_critical: f64,
    /// Milliseconds; alert at or above
    pub response_time_warning: f64,
    pub response_time_critical: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            hit_rate_warning: 70.0,
            hit_rate_critical: 50.0,
            error_rate_warning: 5.0,
            error_rate_critical: 10.0,
            memory_usage_warning: 80.0,
            memory_usage_critical: 90.0,
            response_time_warning: 100.0,
            response_time_critical: 500.0,
        }
    }
}

impl ThresholdConfig {
    /// `(warning, critical)` for a metric.
    pub fn bounds(&self, metric: MonitoredMetric) -> (f64, f64) {
        match metric {
            MonitoredMetric::HitRate => (self.hit_rate_warning, self.hit_rate_critical),
            MonitoredMetric::ErrorRate => (self.error_rate_warning, self.error_rate_critical),
            MonitoredMetric::MemoryUsage => (self.memory_usage_warning, self.memory_usage_critical),
            MonitoredMetric::ResponseTime => {
                (self.response_time_warning, self.response_time_critical)
            }
        }
    }

    /// Compare a value against a metric's bounds, critical first.
    pub fn evaluate(&self, metric: MonitoredMetric, value: f64) -> MetricStatus {
        let (warning, critical) = self.bounds(metric);
        let crossed = |threshold: f64| {
            if metric.lower_is_worse() {
                value < threshold
            } else {
                value >= threshold
            }
        };

        if crossed(critical) {
            MetricStatus::Critical
        } else if crossed(warning) {
            MetricStatus::Warning
        } else {
            MetricStatus::Ok
        }
    }

    /// Threshold that produced a status, if any.
    pub fn threshold_for(&self, metric: MonitoredMetric, status: MetricStatus) -> Option<f64> {
        let (warning, critical) = self.bounds(metric);
        match status {
            MetricStatus::Ok => None,
            MetricStatus::Warning => Some(warning),
            MetricStatus::Critical => Some(critical),
        }
    }

    /// Reject non-finite, out-of-range or inverted bounds.
    pub fn validate(&self) -> Result<()> {
        for metric in MonitoredMetric::ALL {
            let (warning, critical) = self.bounds(metric);
            if !warning.is_finite() || !critical.is_finite() {
                return Err(Error::ConfigValidation(format!(
                    "{} thresholds must be finite numbers",
                    metric
                )));
            }
            if warning < 0.0 || critical < 0.0 {
                return Err(Error::ConfigValidation(format!(
                    "{} thresholds must not be negative",
                    metric
                )));
            }
            if metric.unit() == "%" && (warning > 100.0 || critical > 100.0) {
                return Err(Error::ConfigValidation(format!(
                    "{} thresholds are percentages and must not exceed 100",
                    metric
                )));
            }

            let ordered = if metric.lower_is_worse() {
                critical < warning
            } else {
                warning < critical
            };
            if !ordered {
                let expected = if metric.lower_is_worse() {
                    "critical < warning"
                } else {
                    "warning < critical"
                };
                return Err(Error::ConfigValidation(format!(
                    "{} thresholds are inverted (warning {}, critical {}); expected {}",
                    metric, warning, critical, expected
                )));
            }
        }
        Ok(())
    }

    /// Copy with the update merged in and validated as a whole.
    pub fn merged(&self, update: &ThresholdUpdate) -> Result<ThresholdConfig> {
        let mut next = self.clone();
        let fields = [
            (update.hit_rate_warning, &mut next.hit_rate_warning),
            (update.hit_rate_critical, &mut next.hit_rate_critical),
            (update.error_rate_warning, &mut next.error_rate_warning),
            (update.error_rate_critical, &mut next.error_rate_critical),
            (update.memory_usage_warning, &mut next.memory_usage_warning),
            (update.memory_usage_critical, &mut next.memory_usage_critical),
            (update.response_time_warning, &mut next.response_time_warning),
            (update.response_time_critical, &mut next.response_time_critical),
        ];
        for (value, slot) in fields {
            if let Some(value) = value {
                *slot = value;
            }
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial threshold update; unknown fields are rejected
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdUpdate {
    pub hit_rate_warning: Option<f64>,
    pub hit_rate_critical: Option<f64>,
    pub error_rate_warning: Option<f64>,
    pub error_rate_critical: Option<f64>,
    pub memory_usage_warning: Option<f64>,
    pub memory_usage_critical: Option<f64>,
    pub response_time_warning: Option<f64>,
    pub response_time_critical: Option<f64>,
}

impl ThresholdUpdate {
    /// Parse an update from JSON.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::ConfigValidation(format!("invalid threshold update: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_hit_rate_evaluation() {
        let t = ThresholdConfig::default();
        assert_eq!(t.evaluate(MonitoredMetric::HitRate, 85.0), MetricStatus::Ok);
        assert_eq!(t.evaluate(MonitoredMetric::HitRate, 70.0), MetricStatus::Ok);
        assert_eq!(t.evaluate(MonitoredMetric::HitRate, 60.0), MetricStatus::Warning);
        assert_eq!(t.evaluate(MonitoredMetric::HitRate, 40.0), MetricStatus::Critical);
    }

    #[test]
    fn test_higher_is_worse_evaluation() {
        let t = ThresholdConfig::default();
        assert_eq!(t.evaluate(MonitoredMetric::ErrorRate, 1.0), MetricStatus::Ok);
        assert_eq!(t.evaluate(MonitoredMetric::ErrorRate, 5.0), MetricStatus::Warning);
        assert_eq!(t.evaluate(MonitoredMetric::ErrorRate, 25.0), MetricStatus::Critical);
        assert_eq!(t.evaluate(MonitoredMetric::ResponseTime, 250.0), MetricStatus::Warning);
        assert_eq!(t.evaluate(MonitoredMetric::MemoryUsage, 95.0), MetricStatus::Critical);
    }

    #[test]
    fn test_threshold_for() {
        let t = ThresholdConfig::default();
        assert_eq!(t.threshold_for(MonitoredMetric::HitRate, MetricStatus::Warning), Some(70.0));
        assert_eq!(t.threshold_for(MonitoredMetric::HitRate, MetricStatus::Critical), Some(50.0));
        assert_eq!(t.threshold_for(MonitoredMetric::HitRate, MetricStatus::Ok), None);
    }

    #[test]
    fn test_merge_partial() {
        let t = ThresholdConfig::default();
        let update = ThresholdUpdate::from_json(json!({"response_time_warning": 50.0})).unwrap();
        let merged = t.merged(&update).unwrap();
        assert_eq!(merged.response_time_warning, 50.0);
        assert_eq!(merged.response_time_critical, 500.0);
    }

    #[test]
    fn test_merge_rejects_inverted() {
        let t = ThresholdConfig::default();
        let update = ThresholdUpdate {
            hit_rate_critical: Some(80.0),
            ..Default::default()
        };
        assert_matches!(t.merged(&update), Err(Error::ConfigValidation(_)));

        let update = ThresholdUpdate {
            memory_usage_warning: Some(f64::NAN),
            ..Default::default()
        };
        assert_matches!(t.merged(&update), Err(Error::ConfigValidation(_)));
    }

    #[test]
    fn test_unknown_update_field() {
        assert_matches!(
            ThresholdUpdate::from_json(json!({"cpu_warning": 50})),
            Err(Error::ConfigValidation(_))
        );
    }

    #[test]
    fn test_metric_names() {
        for metric in MonitoredMetric::ALL {
            assert_eq!(MonitoredMetric::from_name(metric.name()), Some(metric));
        }
        assert_eq!(MonitoredMetric::from_name("total_requests"), None);
    }
}
