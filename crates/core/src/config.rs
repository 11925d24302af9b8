// crates/core/src/config.rs
//! Monitor and control-plane connection settings.
//!
//! Both structs have sensible defaults and can be overlaid from environment
//! variables; binaries apply command-line flags on top.

use std::time::Duration;

use crate::error::ConfigError;

/// Default extension of observation after the first terminal phase.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Default depth of the merged output channel.
pub const DEFAULT_BUFFER_DEPTH: usize = 10;

/// Default depth of each watcher's internal queue.
pub const DEFAULT_FEED_DEPTH: usize = 64;

/// Tuning for one [`StreamMerger`](crate::merger::StreamMerger).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// How long to keep draining diagnostics after the first terminal phase.
    pub grace_period: Duration,
    /// Capacity of the merged output channel. Signals beyond it are dropped.
    pub buffer_depth: usize,
    /// Capacity of each subscription's producer queue.
    pub feed_depth: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            buffer_depth: DEFAULT_BUFFER_DEPTH,
            feed_depth: DEFAULT_FEED_DEPTH,
        }
    }
}

impl MonitorConfig {
    /// Defaults overlaid with `JOBWATCH_GRACE_MS` and `JOBWATCH_BUFFER_DEPTH`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup("JOBWATCH_GRACE_MS") {
            config.grace_period = Duration::from_millis(parse_number("JOBWATCH_GRACE_MS", &raw)?);
        }
        if let Some(raw) = lookup("JOBWATCH_BUFFER_DEPTH") {
            config.buffer_depth = parse_positive("JOBWATCH_BUFFER_DEPTH", &raw)?;
        }
        if let Some(raw) = lookup("JOBWATCH_FEED_DEPTH") {
            config.feed_depth = parse_positive("JOBWATCH_FEED_DEPTH", &raw)?;
        }
        Ok(config)
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_buffer_depth(mut self, buffer_depth: usize) -> Self {
        self.buffer_depth = buffer_depth.max(1);
        self
    }
}

/// Where and how to reach the control plane, and which resource kind
/// represents a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub group: String,
    pub version: String,
    pub plural: String,
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8001".to_string(),
            token: None,
            group: "jobwatch.dev".to_string(),
            version: "v1alpha1".to_string(),
            plural: "queries".to_string(),
        }
    }
}

impl PlaneConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            api_url: non_empty("JOBWATCH_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            token: non_empty("JOBWATCH_TOKEN"),
            group: non_empty("JOBWATCH_GROUP").unwrap_or(defaults.group),
            version: non_empty("JOBWATCH_VERSION").unwrap_or(defaults.version),
            plural: non_empty("JOBWATCH_PLURAL").unwrap_or(defaults.plural),
        }
    }
}

fn parse_number(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_positive(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match parse_number(key, raw)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "must be at least 1".to_string(),
        }),
        n => Ok(n as usize),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_monitor_defaults() {
        let config = MonitorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.grace_period, Duration::from_millis(500));
        assert_eq!(config.buffer_depth, 10);
    }

    #[test]
    fn test_monitor_env_overrides() {
        let config = MonitorConfig::from_lookup(lookup(&[
            ("JOBWATCH_GRACE_MS", "1500"),
            ("JOBWATCH_BUFFER_DEPTH", "32"),
        ]))
        .unwrap();
        assert_eq!(config.grace_period, Duration::from_millis(1500));
        assert_eq!(config.buffer_depth, 32);
    }

    #[test]
    fn test_monitor_rejects_bad_values() {
        let err = MonitorConfig::from_lookup(lookup(&[("JOBWATCH_GRACE_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("JOBWATCH_GRACE_MS"));

        let err = MonitorConfig::from_lookup(lookup(&[("JOBWATCH_BUFFER_DEPTH", "0")])).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_plane_config_env() {
        let config = PlaneConfig::from_lookup(lookup(&[
            ("JOBWATCH_API_URL", "https://cp.example.com/"),
            ("JOBWATCH_TOKEN", "abc"),
            ("JOBWATCH_PLURAL", ""),
        ]));
        assert_eq!(config.api_url, "https://cp.example.com");
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.plural, "queries");
    }
}
