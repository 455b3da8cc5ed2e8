//! Engine Configuration
//!
//! Static configuration loaded at startup from an optional YAML file and
//! overridden by CLI flags. Every section has a usable `Default`.
//!
//! ```yaml
//! cache:
//!   namespace: vidmeta
//!   ttl:
//!     video: 1h
//!     trending: 10m
//! thresholds:
//!   hit_rate_warning: 70
//!   hit_rate_critical: 50
//! warming:
//!   concurrency: 4
//!   strategies:
//!     - name: popular
//!       interval: 1h
//!       candidate_limit: 100
//! monitoring:
//!   interval: 60s
//!   metric_retention: 24h
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::TtlPolicy;
use crate::error::{Error, Result};
use crate::monitoring::ThresholdConfig;
use crate::warming::{StrategyRegistry, WarmingStrategy};

/// Longest accepted metric or alert retention window
pub const MAX_RETENTION: Duration = Duration::from_secs(365 * 24 * 3600);

// =============================================================================
// Sections
// =============================================================================

/// Cache section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// Key namespace (`{namespace}:{kind}:{id}`)
    pub namespace: String,
    /// Per-kind TTL table
    pub ttl: TtlPolicy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: "vidmeta".to_string(),
            ttl: TtlPolicy::default(),
        }
    }
}

/// Warming section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WarmingSettings {
    /// Start the scheduler with the engine
    pub autostart: bool,
    /// Concurrent warms per strategy iteration
    pub concurrency: usize,
    /// How long `stop()` waits for each loop before abandoning it
    #[serde(with = "duration_str")]
    pub stop_timeout: Duration,
    /// Initial strategy definitions
    pub strategies: Vec<WarmingStrategy>,
}

impl Default for WarmingSettings {
    fn default() -> Self {
        Self {
            autostart: true,
            concurrency: 4,
            stop_timeout: Duration::from_secs(10),
            strategies: WarmingStrategy::defaults(),
        }
    }
}

/// Monitoring section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitoringSettings {
    /// Start the monitoring loop with the engine
    pub autostart: bool,
    /// Tick interval
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// How long raw samples are kept
    #[serde(with = "duration_str")]
    pub metric_retention: Duration,
    /// How long alerts are kept
    #[serde(with = "duration_str")]
    pub alert_retention: Duration,
    /// Denominator for the memory-usage percentage
    pub max_memory_bytes: u64,
}

impl MonitoringSettings {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::ConfigValidation(
                "monitoring interval must be positive".to_string(),
            ));
        }
        if self.max_memory_bytes == 0 {
            return Err(Error::ConfigValidation(
                "max_memory_bytes must be positive".to_string(),
            ));
        }
        for (name, window) in [
            ("metric_retention", self.metric_retention),
            ("alert_retention", self.alert_retention),
        ] {
            if window.is_zero() || window > MAX_RETENTION {
                return Err(Error::ConfigValidation(format!(
                    "{} must be between 1s and {}, got {}",
                    name,
                    format_duration(MAX_RETENTION),
                    format_duration(window)
                )));
            }
        }
        Ok(())
    }
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            autostart: true,
            interval: Duration::from_secs(60),
            metric_retention: Duration::from_secs(24 * 3600),
            alert_retention: Duration::from_secs(7 * 24 * 3600),
            max_memory_bytes: 1024 * 1024 * 1024,
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub cache: CacheSettings,
    pub thresholds: ThresholdConfig,
    pub warming: WarmingSettings,
    pub monitoring: MonitoringSettings,
}

impl EngineConfig {
    /// Parse configuration from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("invalid YAML configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Reject configurations that would misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.cache.namespace.trim().is_empty() {
            return Err(Error::ConfigValidation(
                "cache namespace must not be empty".to_string(),
            ));
        }
        self.cache.ttl.validate()?;
        self.thresholds.validate()?;

        if self.warming.concurrency == 0 {
            return Err(Error::ConfigValidation(
                "warming concurrency must be at least 1".to_string(),
            ));
        }

        let registry = StrategyRegistry::with_defaults();
        let mut seen = HashSet::new();
        for strategy in &self.warming.strategies {
            strategy.validate()?;
            if !seen.insert(strategy.name.as_str()) {
                return Err(Error::ConfigValidation(format!(
                    "duplicate warming strategy: {}",
                    strategy.name
                )));
            }
            if !registry.contains(&strategy.name) {
                return Err(Error::ConfigValidation(format!(
                    "no candidate selector registered for strategy: {}",
                    strategy.name
                )));
            }
        }

        self.monitoring.validate()
    }
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a duration string like "30s", "5m", "1h", "7d" or "1h30m".
///
/// A trailing bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            num_buf.push(c);
        } else {
            let num: u64 = num_buf
                .parse()
                .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
            num_buf.clear();

            let multiplier = match c {
                'd' | 'D' => 86400,
                'h' | 'H' => 3600,
                'm' | 'M' => 60,
                's' | 'S' => 1,
                _ => {
                    return Err(Error::DurationParse(format!(
                        "unknown duration unit: {}",
                        c
                    )))
                }
            };

            total_secs = num
                .checked_mul(multiplier)
                .and_then(|secs| total_secs.checked_add(secs))
                .ok_or_else(|| overflow(s))?;
        }
    }

    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_secs = total_secs.checked_add(num).ok_or_else(|| overflow(s))?;
    }

    Ok(Duration::from_secs(total_secs))
}

fn overflow(s: &str) -> Error {
    Error::DurationParse(format!("duration out of range: {}", s))
}

/// Render a duration in the largest unit that divides it evenly.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }
    for (unit, size) in [("d", 86400), ("h", 3600), ("m", 60)] {
        if secs % size == 0 {
            return format!("{}{}", secs / size, unit);
        }
    }
    format!("{}s", secs)
}

/// Serde adapter for human-readable duration strings.
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }

    /// Same format for `Option<Duration>` fields.
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&crate::config::format_duration(*d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| crate::config::parse_duration(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
