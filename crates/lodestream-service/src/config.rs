use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Timeouts used by the built-in transports.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportTimeouts {
    /// The timeout for establishing a connection.
    #[serde(with = "humantime_serde")]
    pub connect: Duration,

    /// Global timeout for one fetch.
    #[serde(with = "humantime_serde")]
    pub max_fetch: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            max_fetch: Duration::from_secs(315),
        }
    }
}

/// Configuration for the streaming cache engine.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Whether the engine purges inactive resources on its own.
    ///
    /// When disabled, memory is only reclaimed by explicit
    /// [`clear`](crate::caching::CacheEngine::clear) /
    /// [`unload_and_clear`](crate::caching::CacheEngine::unload_and_clear)
    /// calls.
    pub auto_purge: bool,

    /// How long a resource may go untouched before it becomes a purge
    /// candidate.
    #[serde(with = "humantime_serde")]
    pub purge_time: Duration,

    /// The per-tick wall-clock budget for parsing fetched payloads.
    #[serde(with = "humantime_serde")]
    pub max_prepare_time: Duration,

    /// Bound on the frame-distance modulo window used by the purge pass,
    /// so that frame counter wraparound cannot keep records alive forever.
    pub frame_limit: u64,

    /// Maximum number of errors retained per resource record.
    pub max_errors_per_record: usize,

    /// Timeouts for the built-in transports.
    pub timeouts: TransportTimeouts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_purge: true,
            purge_time: Duration::from_secs(60),
            max_prepare_time: Duration::from_millis(10),
            frame_limit: 1 << 20,
            max_errors_per_record: 8,
            timeouts: TransportTimeouts::default(),
        }
    }
}

impl Config {
    /// Loads a config from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to open config file {}", path.display()))?;
        Self::from_reader(source.as_bytes())
    }

    /// Loads a config from a YAML reader.
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        serde_yaml::from_reader(reader).context("failed to parse config YAML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.auto_purge);
        assert_eq!(config.purge_time, Duration::from_secs(60));
        assert_eq!(config.max_prepare_time, Duration::from_millis(10));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
            auto_purge: false
            purge_time: 2m 30s
            max_prepare_time: 4ms
            timeouts:
              connect: 5s
        "#;
        let config = Config::from_reader(yaml.as_bytes()).unwrap();

        assert!(!config.auto_purge);
        assert_eq!(config.purge_time, Duration::from_secs(150));
        assert_eq!(config.max_prepare_time, Duration::from_millis(4));
        assert_eq!(config.timeouts.connect, Duration::from_secs(5));
        // untouched fields keep their defaults
        assert_eq!(config.timeouts.max_fetch, Duration::from_secs(315));
        assert_eq!(config.max_errors_per_record, 8);
    }
}
