use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: std::env::var("STATSD_SERVER").ok(),
            prefix: "tradecache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Tuning knobs for one of the history caches.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheItemConfig {
    /// Freshness window applied when a caller does not supply one.
    ///
    /// Entries older than this are refetched on the next read; there is no
    /// background expiry sweep.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,

    /// Maximum number of entries held in memory.
    pub capacity: u64,
}

impl Default for CacheItemConfig {
    fn default() -> Self {
        CacheItemConfig {
            max_age: Duration::from_secs(3),
            capacity: 10 * 1024,
        }
    }
}

/// Per-cache configuration.
///
/// Orders move fast and default to a short freshness window; trade history
/// is append-only for the most part and can be kept longer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfigs {
    pub orders: CacheItemConfig,
    pub trades: CacheItemConfig,
}

impl Default for CacheConfigs {
    fn default() -> Self {
        CacheConfigs {
            orders: CacheItemConfig {
                max_age: Duration::from_secs(3),
                ..Default::default()
            },
            trades: CacheItemConfig {
                max_age: Duration::from_secs(30),
                ..Default::default()
            },
        }
    }
}

/// The main configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the dashboard API that serves the history endpoints.
    pub api_url: Url,

    /// Maximum time to establish an upstream connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Overall timeout for a single upstream request.
    ///
    /// This is the only bound on fetch duration; the caching layer itself
    /// never times fetches out.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Cache tuning.
    pub caches: CacheConfigs,

    /// Logging configuration.
    pub logging: Logging,

    /// Metrics configuration.
    pub metrics: Metrics,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_url: Url::parse("http://127.0.0.1:8000/").unwrap(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            caches: Default::default(),
            logging: Default::default(),
            metrics: Default::default(),
        }
    }
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&source)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

fn deserialize_level_filter<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let level: String = Deserialize::deserialize(deserializer)?;
    level.parse().map_err(de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.caches.orders.max_age, Duration::from_secs(3));
        assert_eq!(config.caches.trades.max_age, Duration::from_secs(30));
    }

    #[test]
    fn test_config_overrides() {
        let yaml = r#"
            api_url: "https://dashboard.example.com/"
            request_timeout: 10s
            caches:
              trades:
                max_age: 1m
                capacity: 512
            logging:
              level: debug
              format: json
        "#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api_url.as_str(), "https://dashboard.example.com/");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.caches.trades.max_age, Duration::from_secs(60));
        assert_eq!(config.caches.trades.capacity, 512);
        assert_eq!(config.logging.level, LevelFilter::DEBUG);
        assert_eq!(config.logging.format, LogFormat::Json);
        // untouched defaults
        assert_eq!(config.caches.orders.max_age, Duration::from_secs(3));
    }
}
