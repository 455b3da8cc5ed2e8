//! Administrative Facade
//!
//! `CacheEngine` wires the cache, the warming scheduler and the monitoring
//! loop together and exposes the operations an admin surface needs. Every
//! method is a thin wrapper; behavior lives in the components.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::cache::{CacheStats, CacheStore, KeyCodec, Metadata, MetadataCache};
use crate::config::EngineConfig;
use crate::domain::{EntityKind, KvBackend, Loader};
use crate::error::Result;
use crate::monitoring::{
    Alert, AlertLevel, EngineHealth, Lifecycle, MetricSample, MetricsSnapshot, MonitorStatus,
    MonitoringLoop, Recommendation, ThresholdConfig, ThresholdUpdate,
};
use crate::warming::{
    StrategyRegistry, StrategyStatus, StrategyUpdate, WarmingScheduler, WarmingStrategy,
};

/// The assembled caching engine
pub struct CacheEngine {
    config: EngineConfig,
    cache: Arc<MetadataCache>,
    warming: WarmingScheduler,
    monitor: MonitoringLoop,
    lifecycle: Lifecycle,
}

impl CacheEngine {
    /// Build an engine with the default strategy selectors.
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn KvBackend>,
        loader: Arc<dyn Loader>,
    ) -> Result<Self> {
        Self::with_registry(config, backend, loader, StrategyRegistry::with_defaults())
    }

    /// Build an engine with a custom selector registry.
    pub fn with_registry(
        config: EngineConfig,
        backend: Arc<dyn KvBackend>,
        loader: Arc<dyn Loader>,
        registry: StrategyRegistry,
    ) -> Result<Self> {
        config.cache.ttl.validate()?;
        config.thresholds.validate()?;
        config.monitoring.validate()?;

        let store = Arc::new(CacheStore::new(backend));
        let cache = Arc::new(MetadataCache::new(
            KeyCodec::new(config.cache.namespace.clone()),
            store,
            loader,
            config.cache.ttl.clone(),
        ));
        let warming = WarmingScheduler::new(cache.clone(), registry, &config.warming)?;
        let monitor = MonitoringLoop::new(
            cache.clone(),
            config.thresholds.clone(),
            &config.monitoring,
        );

        Ok(Self {
            config,
            cache,
            warming,
            monitor,
            lifecycle: Lifecycle::new(),
        })
    }

    /// Start the background components marked for autostart.
    pub fn start(&self) {
        if self.config.warming.autostart {
            self.warming.start();
        }
        if self.config.monitoring.autostart {
            self.monitor.start(self.config.monitoring.interval);
        }
        self.lifecycle.set_ready(true);
        info!(
            backend = self.cache.store().backend_name(),
            namespace = %self.config.cache.namespace,
            warming = self.warming.is_running(),
            monitoring = self.monitor.is_running(),
            "Cache engine started"
        );
    }

    /// Stop both loops and wait for them.
    pub async fn shutdown(&self) {
        self.lifecycle.set_ready(false);
        self.warming.stop().await;
        self.monitor.stop().await;
        self.lifecycle.set_live(false);
        info!("Cache engine stopped");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn warming(&self) -> &WarmingScheduler {
        &self.warming
    }

    pub fn monitor(&self) -> &MonitoringLoop {
        &self.monitor
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, kind: EntityKind, id: &str) -> Option<Metadata> {
        self.cache.get(kind, id).await
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.monitor.current_metrics()
    }

    pub fn metric_history(&self, name: Option<&str>, hours: u32) -> Vec<MetricSample> {
        self.monitor.history(name, hours)
    }

    pub fn alerts(&self, level: Option<AlertLevel>, hours: u32) -> Vec<Alert> {
        self.monitor.alerts(level, hours)
    }

    pub fn recommendations(&self) -> Vec<Recommendation> {
        self.monitor.recommendations()
    }

    // =========================================================================
    // Warming
    // =========================================================================

    pub fn start_warming(&self) {
        self.warming.start();
    }

    pub async fn stop_warming(&self) {
        self.warming.stop().await;
    }

    /// One immediate iteration of every enabled strategy.
    pub async fn force_warm(&self) -> BTreeMap<String, usize> {
        self.warming.force_run_all().await
    }

    pub async fn warm_batch(&self, kind: EntityKind, ids: Vec<String>) -> usize {
        self.warming.warm_batch(kind, ids).await
    }

    pub async fn reconfigure_strategy(
        &self,
        name: &str,
        update: StrategyUpdate,
    ) -> Result<WarmingStrategy> {
        self.warming.reconfigure(name, update).await
    }

    pub fn warming_status(&self) -> Vec<StrategyStatus> {
        self.warming.status()
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    pub fn start_monitoring(&self) {
        self.monitor.start(self.config.monitoring.interval);
    }

    pub async fn stop_monitoring(&self) {
        self.monitor.stop().await;
    }

    pub fn update_thresholds(&self, update: &ThresholdUpdate) -> Result<ThresholdConfig> {
        self.monitor.update_thresholds(update)
    }

    pub fn monitor_status(&self) -> MonitorStatus {
        self.monitor.status()
    }

    // =========================================================================
    // Cache Administration
    // =========================================================================

    /// Delete every key under the namespace. Counters are kept.
    pub async fn clear(&self) -> u64 {
        self.cache.clear().await
    }

    pub async fn invalidate(&self, kind: EntityKind, id: &str) -> u64 {
        self.cache.invalidate(kind, id).await
    }

    pub fn reset_stats(&self) {
        self.cache.reset_stats();
    }

    // =========================================================================
    // Health
    // =========================================================================

    pub async fn health(&self) -> EngineHealth {
        self.lifecycle
            .report(&self.cache, &self.warming, &self.monitor)
            .await
    }

    pub fn is_live(&self) -> bool {
        self.lifecycle.is_live()
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle.is_ready()
    }
}

// =============================================================================
// Tests
// =============================================================================
