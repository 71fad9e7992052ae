/*!
 * Configuration types for Slingshot
 */

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, SlingshotError};

/// Fixed cost added per additional hop unless overridden
pub const DEFAULT_HOP_PENALTY: u32 = 10;

/// Default ordered list of source ranking strategies
pub const DEFAULT_STRATEGIES: &str = "EnforceSourceRSEExpression,SkipBlocklistedRSEs,\
SkipRestrictedRSEs,EnforceStagingBuffer,RestrictTapeSources,SkipSchemeMismatch,\
SkipIntermediateTape,HighestAdjustedRankingFirst,PreferDiskOverTape,PathDistance,\
PreferSingleHop";

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Main configuration for path resolution and submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Ordered, comma-separated source ranking strategy names
    #[serde(default = "default_strategies")]
    pub strategies: String,

    /// Fixed cost added per additional hop, biasing search toward fewer hops
    #[serde(default = "default_hop_penalty")]
    pub hop_penalty: u32,

    /// Ranking deficit at which tape sources overtake disk sources.
    /// Policy, not structure: the default means disk must fail twice.
    #[serde(default = "default_tape_deficit")]
    pub tape_deficit_threshold: i32,

    /// Probability mass assigned to the above-average-wait source group
    #[serde(default = "default_exploration")]
    pub exploration_probability: f64,

    /// Per-file overhead assumed by the wait-time model, in seconds
    #[serde(default = "default_wait_overhead")]
    pub wait_overhead_secs: f64,

    /// Source throughput estimate for the wait-time model, bytes/second
    #[serde(default = "default_wait_throughput")]
    pub wait_throughput_bytes_per_sec: f64,

    /// Lookback window for failure-rate aggregation, in seconds
    #[serde(default = "default_stats_lookback")]
    pub stats_lookback_secs: u64,

    /// Number of resolver workers (0 = one per CPU core)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum requests fetched per resolution batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seed for the randomized selection strategy (None = OS entropy).
    /// Set for reproducible runs and deterministic tests.
    #[serde(default)]
    pub sampler_seed: Option<u64>,

    /// Control-plane request retry attempts
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Control-plane retry delay in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Use exponential backoff between control-plane retries
    #[serde(default = "default_true")]
    pub exponential_backoff: bool,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

fn default_strategies() -> String {
    DEFAULT_STRATEGIES.to_string()
}

fn default_hop_penalty() -> u32 {
    DEFAULT_HOP_PENALTY
}

fn default_tape_deficit() -> i32 {
    2
}

fn default_exploration() -> f64 {
    0.1
}

fn default_wait_overhead() -> f64 {
    10.0
}

// 10 Mbit/s
fn default_wait_throughput() -> f64 {
    10.0 * (10u64.pow(6) as f64) / 8.0
}

fn default_stats_lookback() -> u64 {
    3600
}

fn default_workers() -> usize {
    4
}

fn default_batch_size() -> usize {
    100
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
            hop_penalty: default_hop_penalty(),
            tape_deficit_threshold: default_tape_deficit(),
            exploration_probability: default_exploration(),
            wait_overhead_secs: default_wait_overhead(),
            wait_throughput_bytes_per_sec: default_wait_throughput(),
            stats_lookback_secs: default_stats_lookback(),
            workers: default_workers(),
            batch_size: default_batch_size(),
            sampler_seed: None,
            retry_attempts: default_retry_attempts(),
            retry_delay_secs: default_retry_delay(),
            exponential_backoff: true,
            log_level: LogLevel::default(),
            log_file: None,
            verbose: false,
        }
    }
}

impl ResolveConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ResolveConfig = toml::from_str(&contents)
            .map_err(|e| SlingshotError::config(format!("failed to parse {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &PathBuf) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| SlingshotError::config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// The configured strategy names, in application order
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Sanity-check numeric ranges. Strategy names are validated when the
    /// pipeline is built from the registry.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.exploration_probability) {
            return Err(SlingshotError::config(format!(
                "exploration_probability must be within [0, 1], got {}",
                self.exploration_probability
            )));
        }
        if self.wait_throughput_bytes_per_sec <= 0.0 {
            return Err(SlingshotError::config(
                "wait_throughput_bytes_per_sec must be positive",
            ));
        }
        if self.tape_deficit_threshold < 1 {
            return Err(SlingshotError::config(
                "tape_deficit_threshold must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResolveConfig::default();
        assert_eq!(config.hop_penalty, 10);
        assert_eq!(config.tape_deficit_threshold, 2);
        assert_eq!(config.exploration_probability, 0.1);
        assert_eq!(config.wait_throughput_bytes_per_sec, 1_250_000.0);
        assert!(config.exponential_backoff);
        assert_eq!(config.strategy_names().len(), 11);
        assert_eq!(config.strategy_names()[0], "EnforceSourceRSEExpression");
        assert_eq!(config.strategy_names()[10], "PreferSingleHop");
    }

    #[test]
    fn test_strategy_names_trimmed() {
        let config = ResolveConfig {
            strategies: " PathDistance , PreferSingleHop ,".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.strategy_names(),
            vec!["PathDistance", "PreferSingleHop"]
        );
    }

    #[test]
    fn test_validate_rejects_bad_probability() {
        let config = ResolveConfig {
            exploration_probability: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slingshot.toml");

        let mut config = ResolveConfig::default();
        config.hop_penalty = 25;
        config.strategies = "PathDistance".to_string();
        config.to_file(&path).unwrap();

        let loaded = ResolveConfig::from_file(&path).unwrap();
        assert_eq!(loaded.hop_penalty, 25);
        assert_eq!(loaded.strategy_names(), vec!["PathDistance"]);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slingshot.toml");
        std::fs::write(&path, "hop_penalty = 3\n").unwrap();

        let loaded = ResolveConfig::from_file(&path).unwrap();
        assert_eq!(loaded.hop_penalty, 3);
        assert_eq!(loaded.tape_deficit_threshold, 2);
    }
}
