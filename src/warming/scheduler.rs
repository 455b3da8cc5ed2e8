//! Warming Scheduler
//!
//! Runs one cooperative loop per enabled strategy:
//!
//! ```text
//! ┌─► select candidates ──► warm each (bounded concurrency) ──► sleep(interval) ─┐
//! └──────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each loop owns a child [`CancellationToken`] of the scheduler's root
//! token and is checked before selection and before every warm, so `stop()`
//! returns within one warm rather than one interval. Loop handles are kept
//! and joined; nothing is fire-and-forget.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::strategy::{StrategyRegistry, StrategyUpdate, WarmingStrategy};
use crate::cache::MetadataCache;
use crate::config::WarmingSettings;
use crate::domain::EntityKind;
use crate::error::{Error, Result};

// =============================================================================
// Per-Strategy State
// =============================================================================

#[derive(Debug, Default)]
struct StrategyStats {
    runs: AtomicU64,
    warmed: AtomicU64,
    failures: AtomicU64,
    last_warmed: AtomicU64,
    last_run: RwLock<Option<DateTime<Utc>>>,
}

#[derive(Debug)]
struct StrategyEntry {
    config: WarmingStrategy,
    stats: Arc<StrategyStats>,
}

struct StrategyTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Point-in-time view of one strategy
#[derive(Debug, Clone, Serialize)]
pub struct StrategyStatus {
    #[serde(flatten)]
    pub config: WarmingStrategy,
    /// A loop task is alive for this strategy
    pub running: bool,
    pub runs: u64,
    pub warmed: u64,
    pub failures: u64,
    /// Ids warmed by the most recent iteration
    pub last_warmed: u64,
    pub last_run: Option<DateTime<Utc>>,
}

// =============================================================================
// Shared State
// =============================================================================

/// State shared between the scheduler handle and its loop tasks
struct Shared {
    cache: Arc<MetadataCache>,
    registry: StrategyRegistry,
    strategies: RwLock<BTreeMap<String, StrategyEntry>>,
    concurrency: usize,
}

impl Shared {
    fn config(&self, name: &str) -> Option<(WarmingStrategy, Arc<StrategyStats>)> {
        self.strategies
            .read()
            .get(name)
            .map(|e| (e.config.clone(), e.stats.clone()))
    }

    /// One select-then-warm pass. Returns the number of ids warmed.
    async fn run_iteration(
        &self,
        config: &WarmingStrategy,
        stats: &StrategyStats,
        token: &CancellationToken,
    ) -> usize {
        let Some(selector) = self.registry.get(&config.name) else {
            warn!(strategy = %config.name, "No candidate selector registered");
            return 0;
        };
        if token.is_cancelled() {
            return 0;
        }

        let start = Instant::now();
        stats.runs.fetch_add(1, Ordering::Relaxed);
        *stats.last_run.write() = Some(Utc::now());

        let loader = self.cache.loader().clone();
        let candidates = match selector
            .select_candidates(loader.as_ref(), config.candidate_limit)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                error!(strategy = %config.name, error = %e, "Candidate selection failed");
                return 0;
            }
        };

        let total = candidates.len();
        let warmed = warm_all(&self.cache, selector.kind(), candidates, self.concurrency, token).await;

        stats.warmed.fetch_add(warmed as u64, Ordering::Relaxed);
        stats.last_warmed.store(warmed as u64, Ordering::Relaxed);
        info!(
            strategy = %config.name,
            candidates = total,
            warmed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Warming iteration complete"
        );
        warmed
    }
}

/// Warm ids with bounded concurrency, skipping the rest once cancelled.
async fn warm_all(
    cache: &MetadataCache,
    kind: EntityKind,
    ids: Vec<String>,
    concurrency: usize,
    token: &CancellationToken,
) -> usize {
    stream::iter(ids)
        .map(|id| async move {
            if token.is_cancelled() {
                return false;
            }
            cache.warm(kind, &id).await
        })
        .buffer_unordered(concurrency.max(1))
        .filter(|warmed| futures::future::ready(*warmed))
        .count()
        .await
}

async fn run_strategy_loop(shared: Arc<Shared>, name: String, token: CancellationToken) {
    info!(strategy = %name, "Warming loop started");

    loop {
        if token.is_cancelled() {
            break;
        }
        let Some((config, stats)) = shared.config(&name) else {
            break;
        };
        shared.run_iteration(&config, &stats, &token).await;

        // Pick up interval changes made during the iteration
        let interval = shared
            .config(&name)
            .map(|(c, _)| c.interval)
            .unwrap_or(config.interval);

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!(strategy = %name, "Warming loop stopped");
}

// =============================================================================
// Scheduler
// =============================================================================

/// Owns the warming loops
pub struct WarmingScheduler {
    shared: Arc<Shared>,
    stop_timeout: Duration,
    running: AtomicBool,
    root: Mutex<CancellationToken>,
    tasks: Mutex<HashMap<String, StrategyTask>>,
}

impl WarmingScheduler {
    /// Build a scheduler. Every configured strategy must have a selector.
    pub fn new(
        cache: Arc<MetadataCache>,
        registry: StrategyRegistry,
        settings: &WarmingSettings,
    ) -> Result<Self> {
        let mut strategies = BTreeMap::new();
        for config in &settings.strategies {
            config.validate()?;
            if !registry.contains(&config.name) {
                return Err(Error::ConfigValidation(format!(
                    "no candidate selector registered for strategy: {}",
                    config.name
                )));
            }
            let entry = StrategyEntry {
                config: config.clone(),
                stats: Arc::default(),
            };
            if strategies.insert(config.name.clone(), entry).is_some() {
                return Err(Error::ConfigValidation(format!(
                    "duplicate warming strategy: {}",
                    config.name
                )));
            }
        }

        Ok(Self {
            shared: Arc::new(Shared {
                cache,
                registry,
                strategies: RwLock::new(strategies),
                concurrency: settings.concurrency.max(1),
            }),
            stop_timeout: settings.stop_timeout,
            running: AtomicBool::new(false),
            root: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn one loop per enabled strategy. A second call is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Warming scheduler already running");
            return;
        }
        *self.root.lock() = CancellationToken::new();

        let enabled: Vec<String> = self
            .shared
            .strategies
            .read()
            .values()
            .filter(|e| e.config.enabled)
            .map(|e| e.config.name.clone())
            .collect();
        for name in &enabled {
            self.spawn_loop(name);
        }
        info!(strategies = enabled.len(), "Warming scheduler started");
    }

    fn spawn_loop(&self, name: &str) {
        let token = self.root.lock().child_token();
        let handle = tokio::spawn(run_strategy_loop(
            self.shared.clone(),
            name.to_string(),
            token.clone(),
        ));
        let previous = self
            .tasks
            .lock()
            .insert(name.to_string(), StrategyTask { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
    }

    /// Cancel one loop and wait for it, abandoning it after the stop timeout.
    async fn stop_task(&self, name: &str, task: StrategyTask) {
        task.token.cancel();
        let mut handle = task.handle;
        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => debug!(strategy = name, "Warming loop joined"),
            Ok(Err(e)) => error!(strategy = name, error = %e, "Warming loop panicked"),
            Err(_) => {
                handle.abort();
                error!(
                    strategy = name,
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Warming loop ignored cancellation; abandoning it"
                );
            }
        }
    }

    /// Cancel every loop and wait for them to exit.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Warming scheduler not running");
            return;
        }
        self.root.lock().cancel();

        let tasks: Vec<(String, StrategyTask)> = self.tasks.lock().drain().collect();
        futures::future::join_all(
            tasks
                .into_iter()
                .map(|(name, task)| async move { self.stop_task(&name, task).await }),
        )
        .await;
        info!("Warming scheduler stopped");
    }

    /// Apply a partial update to one strategy.
    ///
    /// Unknown names and invalid values are rejected without changing
    /// anything. Interval and limit changes apply from the next iteration;
    /// flipping `enabled` stops or starts the loop when the scheduler runs.
    #[instrument(skip(self))]
    pub async fn reconfigure(&self, name: &str, update: StrategyUpdate) -> Result<WarmingStrategy> {
        let next = {
            let mut strategies = self.shared.strategies.write();
            let entry = strategies.get_mut(name).ok_or_else(|| {
                Error::ConfigValidation(format!("unknown warming strategy: {}", name))
            })?;
            let next = entry.config.apply(&update)?;
            entry.config = next.clone();
            next
        };

        if self.is_running() {
            if next.enabled {
                let alive = self
                    .tasks
                    .lock()
                    .get(name)
                    .map_or(false, |t| !t.handle.is_finished());
                if !alive {
                    self.spawn_loop(name);
                }
            } else {
                let task = self.tasks.lock().remove(name);
                if let Some(task) = task {
                    self.stop_task(name, task).await;
                }
            }
        }

        info!(
            strategy = name,
            enabled = next.enabled,
            interval_secs = next.interval.as_secs(),
            candidate_limit = next.candidate_limit,
            priority = next.priority,
            "Warming strategy reconfigured"
        );
        Ok(next)
    }

    /// Run one iteration of every enabled strategy now.
    #[instrument(skip(self))]
    pub async fn force_run_all(&self) -> BTreeMap<String, usize> {
        let enabled: Vec<(WarmingStrategy, Arc<StrategyStats>)> = self
            .shared
            .strategies
            .read()
            .values()
            .filter(|e| e.config.enabled)
            .map(|e| (e.config.clone(), e.stats.clone()))
            .collect();

        let token = CancellationToken::new();
        let results = futures::future::join_all(enabled.iter().map(|(config, stats)| {
            let token = &token;
            async move {
                let warmed = self.shared.run_iteration(config, stats, token).await;
                (config.name.clone(), warmed)
            }
        }))
        .await;

        results.into_iter().collect()
    }

    /// Warm an explicit id list, e.g. one creator's videos.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn warm_batch(&self, kind: EntityKind, ids: Vec<String>) -> usize {
        let token = CancellationToken::new();
        let warmed = warm_all(&self.shared.cache, kind, ids, self.shared.concurrency, &token).await;
        info!(kind = %kind, warmed, "Batch warm complete");
        warmed
    }

    /// Current configuration and counters of every strategy, by priority.
    pub fn status(&self) -> Vec<StrategyStatus> {
        let tasks = self.tasks.lock();
        let mut statuses: Vec<StrategyStatus> = self
            .shared
            .strategies
            .read()
            .values()
            .map(|entry| StrategyStatus {
                config: entry.config.clone(),
                running: tasks
                    .get(&entry.config.name)
                    .map_or(false, |t| !t.handle.is_finished()),
                runs: entry.stats.runs.load(Ordering::Relaxed),
                warmed: entry.stats.warmed.load(Ordering::Relaxed),
                failures: entry.stats.failures.load(Ordering::Relaxed),
                last_warmed: entry.stats.last_warmed.load(Ordering::Relaxed),
                last_run: *entry.stats.last_run.read(),
            })
            .collect();
        statuses.sort_by(|a, b| {
            a.config
                .priority
                .cmp(&b.config.priority)
                .then_with(|| a.config.name.cmp(&b.config.name))
        });
        statuses
    }

    /// Config of one strategy.
    pub fn strategy(&self, name: &str) -> Option<WarmingStrategy> {
        self.shared.config(name).map(|(c, _)| c)
    }
}

impl Drop for WarmingScheduler {
    fn drop(&mut self) {
        self.root.lock().cancel();
    }
}

impl std::fmt::Debug for WarmingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmingScheduler")
            .field("running", &self.is_running())
            .field("registry", &self.shared.registry)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
