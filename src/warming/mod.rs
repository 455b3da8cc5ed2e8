//! Cache Warming
//!
//! Background pre-population of the metadata cache. Each strategy runs its
//! own loop on its own interval; see [`scheduler`] for the lifecycle.

pub mod scheduler;
pub mod strategy;

pub use scheduler::{StrategyStatus, WarmingScheduler};
pub use strategy::{
    CandidateSelector, FavoritesStrategy, PopularStrategy, RecentStrategy, StrategyRegistry,
    StrategyUpdate, TrendingStrategy, WarmingStrategy,
};
