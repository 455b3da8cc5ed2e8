//! Warming Strategies
//!
//! A strategy is a named, reconfigurable schedule ([`WarmingStrategy`])
//! paired with a [`CandidateSelector`] that decides which ids to warm.
//! Selectors are looked up by name in a [`StrategyRegistry`] built once at
//! startup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::duration_str;
use crate::domain::{EntityKind, Loader, QueryCriteria};
use crate::error::{Error, Result};

fn default_enabled() -> bool {
    true
}

// =============================================================================
// Strategy Configuration
// =============================================================================

/// Schedule and limits for one warming strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarmingStrategy {
    /// Unique name, also the selector lookup key
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Sleep between iterations
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Upper bound on candidates per iteration
    pub candidate_limit: usize,
    /// Informational ordering only; lower sorts first
    #[serde(default)]
    pub priority: i32,
}

impl WarmingStrategy {
    pub fn new(name: impl Into<String>, interval: Duration, candidate_limit: usize) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            interval,
            candidate_limit,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// The four built-in strategies.
    pub fn defaults() -> Vec<WarmingStrategy> {
        vec![
            WarmingStrategy::new("popular", Duration::from_secs(3600), 100).with_priority(1),
            WarmingStrategy::new("trending", Duration::from_secs(15 * 60), 50).with_priority(2),
            WarmingStrategy::new("recent", Duration::from_secs(30 * 60), 50).with_priority(3),
            WarmingStrategy::new("favorites", Duration::from_secs(2 * 3600), 50).with_priority(4),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::ConfigValidation(
                "strategy name must not be empty".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(Error::ConfigValidation(format!(
                "strategy {}: interval must be positive",
                self.name
            )));
        }
        if self.candidate_limit == 0 {
            return Err(Error::ConfigValidation(format!(
                "strategy {}: candidate_limit must be at least 1",
                self.name
            )));
        }
        Ok(())
    }

    /// Copy with the update applied, validated as a whole.
    pub fn apply(&self, update: &StrategyUpdate) -> Result<WarmingStrategy> {
        let mut next = self.clone();
        if let Some(enabled) = update.enabled {
            next.enabled = enabled;
        }
        if let Some(interval) = update.interval {
            next.interval = interval;
        }
        if let Some(limit) = update.candidate_limit {
            next.candidate_limit = limit;
        }
        if let Some(priority) = update.priority {
            next.priority = priority;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial runtime update for a strategy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyUpdate {
    pub enabled: Option<bool>,
    #[serde(with = "duration_str::option")]
    pub interval: Option<Duration>,
    pub candidate_limit: Option<usize>,
    pub priority: Option<i32>,
}

impl StrategyUpdate {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    /// Parse an update from JSON, rejecting unknown fields.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::ConfigValidation(format!("invalid strategy update: {}", e)))
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

// =============================================================================
// Candidate Selection
// =============================================================================

/// Chooses which ids a strategy warms.
#[async_trait]
pub trait CandidateSelector: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Entity kind the candidates belong to
    fn kind(&self) -> EntityKind {
        EntityKind::Video
    }

    /// Query sent to the source of truth
    fn criteria(&self) -> QueryCriteria;

    /// Up to `limit` ids, best first.
    async fn select_candidates(&self, loader: &dyn Loader, limit: usize) -> Result<Vec<String>> {
        let mut ids = loader.query(self.kind(), &self.criteria(), limit).await?;
        ids.truncate(limit);
        Ok(ids)
    }
}

/// Most viewed over the last week
#[derive(Debug, Default)]
pub struct PopularStrategy;

impl CandidateSelector for PopularStrategy {
    fn name(&self) -> &'static str {
        "popular"
    }

    fn criteria(&self) -> QueryCriteria {
        QueryCriteria::MostViewed { window_hours: 168 }
    }
}

/// Highest engagement over the last day
#[derive(Debug, Default)]
pub struct TrendingStrategy;

impl CandidateSelector for TrendingStrategy {
    fn name(&self) -> &'static str {
        "trending"
    }

    fn criteria(&self) -> QueryCriteria {
        QueryCriteria::HighestEngagement { window_hours: 24 }
    }
}

/// Created in the last day
#[derive(Debug, Default)]
pub struct RecentStrategy;

impl CandidateSelector for RecentStrategy {
    fn name(&self) -> &'static str {
        "recent"
    }

    fn criteria(&self) -> QueryCriteria {
        QueryCriteria::MostRecent { window_hours: 24 }
    }
}

/// Best like-to-view ratio among videos with a meaningful audience
#[derive(Debug)]
pub struct FavoritesStrategy {
    pub min_views: u64,
}

impl Default for FavoritesStrategy {
    fn default() -> Self {
        Self { min_views: 1000 }
    }
}

impl CandidateSelector for FavoritesStrategy {
    fn name(&self) -> &'static str {
        "favorites"
    }

    fn criteria(&self) -> QueryCriteria {
        QueryCriteria::BestLikeRatio {
            min_views: self.min_views,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Name to selector map
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    selectors: BTreeMap<String, Arc<dyn CandidateSelector>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the four built-in selectors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PopularStrategy));
        registry.register(Arc::new(TrendingStrategy));
        registry.register(Arc::new(RecentStrategy));
        registry.register(Arc::new(FavoritesStrategy::default()));
        registry
    }

    /// Add or replace a selector under its own name.
    pub fn register(&mut self, selector: Arc<dyn CandidateSelector>) {
        self.selectors.insert(selector.name().to_string(), selector);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CandidateSelector>> {
        self.selectors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.selectors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.selectors.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
