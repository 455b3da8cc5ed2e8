//! Metadata Cache Engine Integration Tests
//!
//! Drives the public API end to end against the in-memory backend and a
//! scripted loader:
//! - Read-through caching and invalidation cascades
//! - Concurrent warming and the warming lifecycle
//! - Threshold alerting and history retention
//! - Fail-soft behavior with the backend down

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use metacache::adapters::InMemoryKvBackend;
use metacache::domain::{EntityKind, Loader, QueryCriteria, Record};
use metacache::{CacheEngine, EngineConfig, Result};

// =============================================================================
// Test Fixtures
// =============================================================================

/// Loader that serves fixed records and counts every call.
#[derive(Default)]
struct ScriptedLoader {
    records: Mutex<HashMap<(EntityKind, String), Value>>,
    candidates: Vec<String>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
    queries: AtomicUsize,
}

impl ScriptedLoader {
    fn new() -> Self {
        Self::default()
    }

    fn with_candidates(mut self, ids: &[&str]) -> Self {
        self.candidates = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn insert(&self, kind: EntityKind, id: &str, record: Value) {
        self.records.lock().insert((kind, id.to_string()), record);
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Loader for ScriptedLoader {
    async fn fetch(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let known = self.records.lock().get(&(kind, id.to_string())).cloned();
        Ok(known.or_else(|| Some(json!({"id": id, "title": format!("{} {}", kind, id)}))))
    }

    async fn query(
        &self,
        _kind: EntityKind,
        _criteria: &QueryCriteria,
        limit: usize,
    ) -> Result<Vec<String>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.candidates.iter().take(limit).cloned().collect())
    }
}

fn quiet_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.cache.namespace = "it".to_string();
    config.warming.autostart = false;
    config.monitoring.autostart = false;
    config
}

fn engine_with(
    config: EngineConfig,
    loader: Arc<ScriptedLoader>,
) -> (CacheEngine, Arc<InMemoryKvBackend>) {
    let backend = Arc::new(InMemoryKvBackend::new());
    let engine = CacheEngine::new(config, backend.clone(), loader).unwrap();
    (engine, backend)
}

// =============================================================================
// Read-Through Cache
// =============================================================================

mod cache_tests {
    use super::*;
    use metacache::cache::{Dimensions, KeyKind, Timeframe};

    #[tokio::test]
    async fn test_get_populates_then_hits() {
        let loader = Arc::new(ScriptedLoader::new());
        loader.insert(
            EntityKind::Video,
            "v1",
            json!({"id": "v1", "title": "Launch", "views": 10, "thumbnail": null}),
        );
        let (engine, _) = engine_with(quiet_config(), loader.clone());

        let first = engine.get(EntityKind::Video, "v1").await.unwrap();
        let second = engine.get(EntityKind::Video, "v1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.attributes.get("title"), Some(&json!("Launch")));
        assert!(!first.attributes.contains_key("thumbnail"));
        assert!(!first.attributes.contains_key("id"));
        assert_eq!(loader.fetches(), 1);

        let stats = engine.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
        assert_eq!(stats.hit_rate, 50.0);
    }

    #[tokio::test]
    async fn test_video_invalidation_cascade() {
        let loader = Arc::new(ScriptedLoader::new().with_candidates(&["v1", "v2"]));
        loader.insert(
            EntityKind::Video,
            "v1",
            json!({"id": "v1", "title": "Launch", "channel_id": "c1"}),
        );
        let (engine, backend) = engine_with(quiet_config(), loader.clone());
        let cache = engine.cache();

        cache.get(EntityKind::Video, "v1").await.unwrap();
        for tf in Timeframe::ALL {
            let dims = Dimensions::new().timeframe(tf);
            cache.get_list(KeyKind::Trending, "all", &dims).await.unwrap();
        }
        cache
            .get_list(KeyKind::PopularTags, "all", &Dimensions::new())
            .await
            .unwrap();
        cache
            .get_list(KeyKind::TagVideos, "all", &Dimensions::new().tags(["rust", "async"]))
            .await
            .unwrap();
        cache
            .get_list(KeyKind::ChannelVideos, "c1", &Dimensions::new())
            .await
            .unwrap();
        cache
            .get_list(KeyKind::ChannelVideos, "c1", &Dimensions::new().page(2))
            .await
            .unwrap();
        // Another channel whose id shares a prefix must survive
        cache
            .get_list(KeyKind::ChannelVideos, "c10", &Dimensions::new())
            .await
            .unwrap();
        assert_eq!(backend.len(), 10);

        let removed = engine.invalidate(EntityKind::Video, "v1").await;
        assert_eq!(removed, 9);
        assert_eq!(backend.len(), 1);

        let codec = cache.codec();
        let survivor = codec.key_for(KeyKind::ChannelVideos, "c10", &Dimensions::new());
        assert!(cache.store().exists(&survivor).await);
        assert!(!cache.is_cached(EntityKind::Video, "v1").await);
        assert_eq!(engine.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_tag_set_order_shares_one_entry() {
        let loader = Arc::new(ScriptedLoader::new().with_candidates(&["v1"]));
        let (engine, _) = engine_with(quiet_config(), loader.clone());
        let cache = engine.cache();

        cache
            .get_list(KeyKind::TagVideos, "all", &Dimensions::new().tags(["b", "a"]))
            .await
            .unwrap();
        cache
            .get_list(KeyKind::TagVideos, "all", &Dimensions::new().tags(["A", "b"]))
            .await
            .unwrap();

        assert_eq!(loader.queries(), 1);
        assert_eq!(engine.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_missing_record_is_not_cached() {
        struct EmptyLoader;

        #[async_trait]
        impl Loader for EmptyLoader {
            async fn fetch(&self, _kind: EntityKind, _id: &str) -> Result<Option<Record>> {
                Ok(None)
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

        let backend = Arc::new(InMemoryKvBackend::new());
        let engine =
            CacheEngine::new(quiet_config(), backend.clone(), Arc::new(EmptyLoader)).unwrap();

        assert!(engine.get(EntityKind::User, "ghost").await.is_none());
        assert!(engine.get(EntityKind::User, "ghost").await.is_none());
        assert!(backend.is_empty());
        assert_eq!(engine.stats().misses, 2);
    }
}

// =============================================================================
// Warming
// =============================================================================

mod warming_tests {
    use super::*;
    use metacache::warming::{StrategyUpdate, WarmingStrategy};
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_concurrent_warms_load_once() {
        let loader = Arc::new(ScriptedLoader::new().with_delay(Duration::from_millis(50)));
        let (engine, _) = engine_with(quiet_config(), loader.clone());
        let cache = engine.cache().clone();

        let warms = (0..50).map(|_| {
            let cache = cache.clone();
            async move { cache.warm(EntityKind::Video, "hot").await }
        });
        let results = futures::future::join_all(warms).await;

        assert_eq!(results.iter().filter(|warmed| **warmed).count(), 1);
        assert_eq!(loader.fetches(), 1);
        assert_eq!(cache.warms_in_progress(), 0);
        assert!(cache.is_cached(EntityKind::Video, "hot").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_strategy_stops_running() {
        let loader = Arc::new(ScriptedLoader::new().with_candidates(&["v1", "v2", "v3"]));
        let mut config = quiet_config();
        config.warming.strategies =
            vec![WarmingStrategy::new("popular", Duration::from_secs(1), 10)];
        let (engine, _) = engine_with(config, loader.clone());

        engine.start_warming();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(loader.queries(), 3);

        let updated = engine
            .reconfigure_strategy("popular", StrategyUpdate::enabled(false))
            .await
            .unwrap();
        assert!(!updated.enabled);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(loader.queries(), 3);

        let status = engine.warming_status();
        assert_eq!(status.len(), 1);
        assert!(!status[0].running);
        assert_eq!(status[0].runs, 3);

        engine.stop_warming().await;
    }

    #[tokio::test]
    async fn test_force_warm_and_batch() {
        let loader = Arc::new(ScriptedLoader::new().with_candidates(&["v1", "v2"]));
        let (engine, backend) = engine_with(quiet_config(), loader.clone());

        let results = engine.force_warm().await;
        assert_eq!(results.len(), 4);
        assert!(results.values().all(|warmed| *warmed <= 2));
        assert!(engine.cache().is_cached(EntityKind::Video, "v1").await);

        let warmed = engine
            .warm_batch(EntityKind::Channel, vec!["c1".into(), "c2".into()])
            .await;
        assert_eq!(warmed, 2);
        assert_eq!(backend.len(), 4);
        assert!(!engine.warming().is_running());
    }

    #[tokio::test]
    async fn test_reconfigure_rejects_unknown_and_invalid() {
        let loader = Arc::new(ScriptedLoader::new());
        let (engine, _) = engine_with(quiet_config(), loader);

        assert_err!(
            engine
                .reconfigure_strategy("clairvoyant", StrategyUpdate::enabled(true))
                .await
        );

        let bad = assert_ok!(StrategyUpdate::from_json(json!({"candidate_limit": 0})));
        assert_err!(engine.reconfigure_strategy("popular", bad).await);
        assert_eq!(
            engine.warming().strategy("popular").unwrap().candidate_limit,
            100
        );
    }
}

// =============================================================================
// Monitoring
// =============================================================================

mod monitoring_tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use metacache::monitoring::{MetricSample, MetricStatus, MonitoredMetric, ThresholdUpdate};
    use metacache::AlertLevel;

    async fn drive(engine: &CacheEngine, hits: usize, misses: usize) {
        for i in 0..misses {
            engine.get(EntityKind::Video, &format!("m{}", i)).await;
        }
        for _ in 0..hits {
            engine.get(EntityKind::Video, "m0").await;
        }
    }

    #[tokio::test]
    async fn test_hit_rate_warning() {
        let (engine, _) = engine_with(quiet_config(), Arc::new(ScriptedLoader::new()));
        drive(&engine, 3, 2).await;

        let alerts = engine.monitor().tick().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
        assert_eq!(alerts[0].metric_name, "hit_rate");
        assert_eq!(alerts[0].current_value, 60.0);
        assert_eq!(alerts[0].threshold, 70.0);

        let snapshot = engine.metrics();
        assert_eq!(snapshot.status_of(MonitoredMetric::HitRate), Some(MetricStatus::Warning));
        assert_eq!(engine.alerts(Some(AlertLevel::Warning), 1).len(), 1);
    }

    #[tokio::test]
    async fn test_hit_rate_critical() {
        let (engine, _) = engine_with(quiet_config(), Arc::new(ScriptedLoader::new()));
        drive(&engine, 2, 3).await;

        let alerts = engine.monitor().tick().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert_eq!(alerts[0].threshold, 50.0);
        assert_eq!(engine.metrics().overall, MetricStatus::Critical);

        let recommendations = engine.recommendations();
        assert_eq!(recommendations[0].severity, MetricStatus::Critical);
        assert_eq!(recommendations[0].metric.as_deref(), Some("hit_rate"));
    }

    #[tokio::test]
    async fn test_recovery_after_threshold_update() {
        let (engine, _) = engine_with(quiet_config(), Arc::new(ScriptedLoader::new()));
        drive(&engine, 3, 2).await;
        assert_eq!(engine.monitor().tick().await.len(), 1);

        let update = ThresholdUpdate {
            hit_rate_warning: Some(55.0),
            hit_rate_critical: Some(40.0),
            ..Default::default()
        };
        engine.update_thresholds(&update).unwrap();

        let alerts = engine.monitor().tick().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Info);

        // Steady ok state raises nothing further
        assert!(engine.monitor().tick().await.is_empty());
    }

    #[tokio::test]
    async fn test_old_samples_pruned_on_tick() {
        let (engine, _) = engine_with(quiet_config(), Arc::new(ScriptedLoader::new()));
        let now = Utc::now();
        for hours_ago in 0..30 {
            engine.monitor().record_sample(
                MetricSample::new("hit_rate", 90.0)
                    .at(now - ChronoDuration::minutes(hours_ago * 60 + 30)),
            );
        }
        assert_eq!(engine.metric_history(Some("hit_rate"), 48).len(), 30);

        engine.monitor().tick().await;

        let kept = engine.metric_history(Some("hit_rate"), 48);
        let cutoff = Utc::now() - ChronoDuration::hours(24);
        assert!(kept.iter().all(|s| s.timestamp >= cutoff));
        assert_eq!(kept.len(), 24);
    }

    #[tokio::test]
    async fn test_widest_history_window() {
        let (engine, _) = engine_with(quiet_config(), Arc::new(ScriptedLoader::new()));
        drive(&engine, 2, 3).await;
        engine.monitor().tick().await;

        assert!(!engine.metric_history(None, u32::MAX).is_empty());
        assert_eq!(engine.metric_history(Some("hit_rate"), u32::MAX).len(), 1);
        assert_eq!(engine.alerts(None, u32::MAX).len(), 1);
        assert_eq!(engine.alerts(Some(AlertLevel::Critical), u32::MAX).len(), 1);
    }

    #[test]
    fn test_engine_rejects_oversized_retention() {
        let mut config = quiet_config();
        config.monitoring.metric_retention = Duration::from_secs(100_000_000 * 86_400);
        let result = CacheEngine::new(
            config,
            Arc::new(InMemoryKvBackend::new()),
            Arc::new(ScriptedLoader::new()),
        );
        assert!(matches!(result, Err(metacache::Error::ConfigValidation(_))));
    }

    #[tokio::test]
    async fn test_reset_stats_drops_rates_from_health() {
        let (engine, _) = engine_with(quiet_config(), Arc::new(ScriptedLoader::new()));
        engine.start();
        engine.start_warming();
        engine.start_monitoring();
        drive(&engine, 1, 4).await;
        engine.monitor().tick().await;
        assert_eq!(engine.health().await.critical_metrics, vec!["hit_rate".to_string()]);

        engine.reset_stats();
        engine.monitor().tick().await;

        let health = engine.health().await;
        assert!(health.critical_metrics.is_empty());
        assert_eq!(health.hit_rate, None);
        assert_eq!(engine.recommendations()[0].severity, MetricStatus::Ok);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_traffic_skips_rate_metrics() {
        let (engine, _) = engine_with(quiet_config(), Arc::new(ScriptedLoader::new()));
        let alerts = engine.monitor().tick().await;
        assert!(alerts.is_empty());

        let snapshot = engine.metrics();
        assert!(snapshot.status_of(MonitoredMetric::HitRate).is_none());
        assert!(snapshot.status_of(MonitoredMetric::MemoryUsage).is_some());
    }
}

// =============================================================================
// Fail-Soft Backend
// =============================================================================

mod failure_tests {
    use super::*;
    use metacache::monitoring::{Component, HealthStatus};

    #[tokio::test]
    async fn test_backend_down_serves_from_loader() {
        let loader = Arc::new(ScriptedLoader::new());
        loader.insert(EntityKind::Channel, "c1", json!({"id": "c1", "name": "Rustaceans"}));
        let (engine, backend) = engine_with(quiet_config(), loader.clone());
        backend.set_offline(true);

        let first = engine.get(EntityKind::Channel, "c1").await.unwrap();
        let second = engine.get(EntityKind::Channel, "c1").await.unwrap();
        assert_eq!(first.attributes.get("name"), Some(&json!("Rustaceans")));
        assert_eq!(second.attributes, first.attributes);
        assert_eq!(loader.fetches(), 2);

        let stats = engine.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.sets, 0);
        assert_eq!(stats.errors, 4);
        assert_eq!(engine.cache().store().error_count(), 4);

        // Invalidation and clear still return instead of failing
        assert_eq!(engine.invalidate(EntityKind::Channel, "c1").await, 0);
        assert_eq!(engine.clear().await, 0);
    }

    #[tokio::test]
    async fn test_backend_down_degrades_health() {
        let (engine, backend) = engine_with(quiet_config(), Arc::new(ScriptedLoader::new()));
        engine.start();
        engine.start_warming();
        engine.start_monitoring();

        assert_eq!(engine.health().await.status, HealthStatus::Healthy);

        backend.set_offline(true);
        let report = engine.health().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        let backend_check = report.component(Component::Backend).unwrap();
        assert_eq!(backend_check.status, HealthStatus::Degraded);
        assert!(backend_check.detail.as_deref().unwrap().contains("memory backend unreachable"));
        assert_eq!(report.backend, "memory");

        engine.shutdown().await;
    }
}
