//! Engine Health
//!
//! One report per request, built from the engine's own components. A
//! backend outage makes the engine `degraded`, never `unhealthy`: reads
//! still succeed through the loader. Only the lifecycle (not started or
//! shutting down) makes it unhealthy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::monitor::MonitoringLoop;
use super::thresholds::{MetricStatus, MonitoredMetric};
use crate::cache::MetadataCache;
use crate::warming::WarmingScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Still serving reads
    pub fn is_operational(&self) -> bool {
        *self != HealthStatus::Unhealthy
    }
}

/// Engine part a health entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Lifecycle,
    Backend,
    Warming,
    Monitoring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: Component,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Round trip of the backend ping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn new(component: Component, status: HealthStatus, detail: Option<String>) -> Self {
        Self {
            component,
            status,
            detail,
            latency_ms: None,
        }
    }
}

/// Body of the `/health` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealth {
    /// Worst component status
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub backend: String,
    /// Hit rate of the latest tick, when there was traffic
    pub hit_rate: Option<f64>,
    /// Metrics currently past their critical bound
    pub critical_metrics: Vec<String>,
    pub version: String,
    pub uptime_seconds: u64,
}

impl EngineHealth {
    pub fn component(&self, component: Component) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.component == component)
    }
}

/// Liveness and readiness flags of the running engine
#[derive(Debug)]
pub struct Lifecycle {
    started_at: Instant,
    live: AtomicBool,
    ready: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Relaxed);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    fn check(&self) -> ComponentHealth {
        let (status, detail) = match (self.is_live(), self.is_ready()) {
            (false, _) => (HealthStatus::Unhealthy, Some("shutting down")),
            (true, false) => (HealthStatus::Unhealthy, Some("not started")),
            (true, true) => (HealthStatus::Healthy, None),
        };
        ComponentHealth::new(Component::Lifecycle, status, detail.map(String::from))
    }

    /// Check every component of the engine.
    pub async fn report(
        &self,
        cache: &MetadataCache,
        warming: &WarmingScheduler,
        monitor: &MonitoringLoop,
    ) -> EngineHealth {
        let backend_name = cache.store().backend_name();
        let mut components = vec![self.check()];

        let ping_start = Instant::now();
        let mut backend = if cache.store().ping().await {
            ComponentHealth::new(Component::Backend, HealthStatus::Healthy, None)
        } else {
            ComponentHealth::new(
                Component::Backend,
                HealthStatus::Degraded,
                Some(format!(
                    "{} backend unreachable; reads fall through to the loader",
                    backend_name
                )),
            )
        };
        backend.latency_ms = Some(ping_start.elapsed().as_millis() as u64);
        components.push(backend);

        components.push(if warming.is_running() {
            ComponentHealth::new(Component::Warming, HealthStatus::Healthy, None)
        } else {
            ComponentHealth::new(
                Component::Warming,
                HealthStatus::Degraded,
                Some("scheduler stopped".to_string()),
            )
        });

        let snapshot = monitor.current_metrics();
        let critical_metrics: Vec<String> = MonitoredMetric::ALL
            .into_iter()
            .filter(|m| snapshot.status_of(*m) == Some(MetricStatus::Critical))
            .map(|m| m.name().to_string())
            .collect();
        components.push(if !monitor.is_running() {
            ComponentHealth::new(
                Component::Monitoring,
                HealthStatus::Degraded,
                Some("loop stopped".to_string()),
            )
        } else if !critical_metrics.is_empty() {
            ComponentHealth::new(
                Component::Monitoring,
                HealthStatus::Degraded,
                Some(format!("critical: {}", critical_metrics.join(", "))),
            )
        } else {
            ComponentHealth::new(Component::Monitoring, HealthStatus::Healthy, None)
        });

        EngineHealth {
            status: components
                .iter()
                .map(|c| c.status)
                .max()
                .unwrap_or(HealthStatus::Healthy),
            components,
            backend: backend_name.to_string(),
            hit_rate: snapshot
                .metrics
                .get(MonitoredMetric::HitRate.name())
                .map(|r| r.value),
            critical_metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
