//! Agent configuration
//!
//! Handles:
//! - The metric vocabulary (cpu, memory, disk, network, uptime)
//! - Parsing and validating the raw key/value mapping handed over at startup
//! - Sparse patches applied by live reconfiguration
//! - Environment and `.env` sourcing

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// A required configuration key, known by its environment name and a short alias
#[derive(Debug, Clone, Copy)]
pub struct RawKey {
    pub env: &'static str,
    pub short: &'static str,
}

pub const HOST_ID: RawKey = RawKey { env: "AGENT_HOST_ID", short: "host_id" };
pub const METRICS_INTERVAL: RawKey = RawKey { env: "AGENT_METRICS_INTERVAL", short: "metrics_interval" };
pub const ENABLED_METRICS: RawKey = RawKey { env: "AGENT_ENABLED_METRICS", short: "enabled_metrics" };
pub const COLLECTOR_ENDPOINT: RawKey = RawKey { env: "AGENT_COLLECTOR_ENDPOINT", short: "collector_endpoint" };

const REQUIRED_KEYS: [RawKey; 4] = [HOST_ID, METRICS_INTERVAL, ENABLED_METRICS, COLLECTOR_ENDPOINT];

/// Configuration load / reconfiguration failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required key: {0}")]
    MissingKey(&'static str),
    #[error("invalid {key}: {reason}")]
    Parse { key: &'static str, reason: String },
    #[error("invalid configuration: {0}")]
    Validation(String),
    #[error("configuration not loaded")]
    NotLoaded,
}

/// Metric families the agent knows how to sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    Cpu,
    Memory,
    Disk,
    Network,
    Uptime,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Cpu,
        Metric::Memory,
        Metric::Disk,
        Metric::Network,
        Metric::Uptime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
            Metric::Disk => "disk",
            Metric::Network => "network",
            Metric::Uptime => "uptime",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ConfigError;

    /// Exact, case-sensitive match against the vocabulary
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|metric| metric.as_str() == s)
            .ok_or_else(|| ConfigError::Validation(format!("unknown metric '{}'", s)))
    }
}

/// Validated agent operating parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub host_id: String,
    pub metrics_interval_seconds: i64,
    pub enabled_metrics: BTreeSet<Metric>,
    pub collector_endpoint: String,
}

impl Configuration {
    /// Parse and validate the raw mapping produced by the configuration source
    pub fn from_raw(raw: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let host_id = required(raw, HOST_ID)?;
        let interval = required(raw, METRICS_INTERVAL)?;
        let enabled = required(raw, ENABLED_METRICS)?;
        let collector_endpoint = required(raw, COLLECTOR_ENDPOINT)?;

        let metrics_interval_seconds = interval.parse::<i64>().map_err(|e| ConfigError::Parse {
            key: METRICS_INTERVAL.env,
            reason: format!("'{}' is not an integer ({})", interval, e),
        })?;

        let config = Configuration {
            host_id: host_id.to_string(),
            metrics_interval_seconds,
            enabled_metrics: parse_metric_list(enabled.split(','))?,
            collector_endpoint: collector_endpoint.to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host_id.trim().is_empty() {
            return Err(ConfigError::Validation("host_id must not be empty".into()));
        }
        if self.metrics_interval_seconds <= 0 {
            return Err(ConfigError::Validation(format!(
                "metrics_interval must be positive, got {}",
                self.metrics_interval_seconds
            )));
        }
        if self.enabled_metrics.is_empty() {
            return Err(ConfigError::Validation("enabled_metrics must not be empty".into()));
        }
        if self.collector_endpoint.trim().is_empty() {
            return Err(ConfigError::Validation("collector_endpoint must not be empty".into()));
        }
        Ok(())
    }

    pub fn is_enabled(&self, metric: Metric) -> bool {
        self.enabled_metrics.contains(&metric)
    }

    /// Sampling cadence as a `Duration` (validated configs are always > 0)
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_seconds.max(1) as u64)
    }
}

/// Sparse set of overrides for a live reconfiguration.
///
/// Absent, empty or zero fields keep the current value. Strings are trimmed
/// the same way `Configuration::from_raw` trims raw values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigPatch {
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub metrics_interval: Option<i64>,
    #[serde(default)]
    pub enabled_metrics: Option<Vec<String>>,
    #[serde(default)]
    pub collector_endpoint: Option<String>,
}

impl ConfigPatch {
    /// Build the candidate configuration: patch fields merged over `current`, then validated
    pub fn merge_onto(&self, current: &Configuration) -> Result<Configuration, ConfigError> {
        let mut candidate = current.clone();

        if let Some(host_id) = self.host_id.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            candidate.host_id = host_id.to_string();
        }
        if let Some(interval) = self.metrics_interval.filter(|v| *v != 0) {
            candidate.metrics_interval_seconds = interval;
        }
        if let Some(tokens) = self.enabled_metrics.as_ref().filter(|t| !t.is_empty()) {
            candidate.enabled_metrics = parse_metric_list(tokens)?;
        }
        if let Some(endpoint) = self
            .collector_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            candidate.collector_endpoint = endpoint.to_string();
        }

        candidate.validate()?;
        Ok(candidate)
    }
}

/// Parse metric tokens into a set; one unknown or empty token rejects the whole list.
///
/// Only the whitespace around a token (`cpu, memory`) is ignored.
pub fn parse_metric_list<I, S>(tokens: I) -> Result<BTreeSet<Metric>, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut metrics = BTreeSet::new();
    for token in tokens {
        let token = token.as_ref();
        if token.trim().is_empty() {
            return Err(ConfigError::Validation("enabled_metrics contains an empty entry".into()));
        }
        metrics.insert(token.trim().parse::<Metric>()?);
    }
    Ok(metrics)
}

fn required<'a>(raw: &'a HashMap<String, String>, key: RawKey) -> Result<&'a str, ConfigError> {
    raw.get(key.env)
        .or_else(|| raw.get(key.short))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingKey(key.env))
}

/// Gather the agent's keys from the process environment
pub fn raw_from_env() -> HashMap<String, String> {
    REQUIRED_KEYS
        .iter()
        .filter_map(|key| std::env::var(key.env).ok().map(|v| (key.env.to_string(), v)))
        .collect()
}

/// Read a dotenv file into a raw mapping without touching the process environment
pub fn raw_from_file<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>, dotenvy::Error> {
    dotenvy::from_path_iter(path.as_ref())?.collect()
}
