//! Monitoring and Alerting
//!
//! - **thresholds**: warning/critical bounds and the pure status check
//! - **history**: bounded sample and alert windows
//! - **monitor**: the tick loop, snapshots and recommendations
//! - **health**: lifecycle flags and the per-component health report

pub mod health;
pub mod history;
pub mod monitor;
pub mod thresholds;

pub use health::{Component, ComponentHealth, EngineHealth, HealthStatus, Lifecycle};
pub use history::{Alert, AlertLevel, MetricHistory, MetricSample};
pub use monitor::{
    recommendations_for, MetricReading, MetricsSnapshot, MonitorStatus, MonitoringLoop,
    Recommendation, TOTAL_REQUESTS,
};
pub use thresholds::{MetricStatus, MonitoredMetric, ThresholdConfig, ThresholdUpdate};
