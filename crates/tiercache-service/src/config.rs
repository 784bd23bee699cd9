use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

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
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "tiercache".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Limits of the object cache.
///
/// These are fixed for the lifetime of an [`ObjectCache`](crate::caching::ObjectCache).
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Name of the directory below `cache_dir` holding the persisted entries.
    pub namespace: String,

    /// Upper bound (in bytes) for the total size of persisted entries.
    ///
    /// Enforced by an eviction pass after every write. Defaults to `50 MiB`.
    pub max_disk_size: u64,

    /// Maximum age of a persisted entry, counted from its creation.
    ///
    /// Older entries are reported as missing. Defaults to `7d`.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,

    /// Capacity (in bytes) for the in-memory tier.
    ///
    /// The in-memory size limit is a best-effort approximation, and not an exact limit.
    ///
    /// Defaults to `100 MiB (= 104_857_600)`.
    pub in_memory_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let meg = 1024 * 1024;
        Self {
            namespace: "objects".into(),
            max_disk_size: 50 * meg,
            max_age: Duration::from_secs(3600 * 24 * 7),
            in_memory_capacity: 100 * meg,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which directory to use when caching. Default is not to persist anything.
    pub cache_dir: Option<PathBuf>,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Fine-tune cache limits.
    pub caches: CacheConfig,

    /// The maximum timeout for a single fetch, including reading the body.
    #[serde(with = "humantime_serde")]
    pub max_download_timeout: Duration,

    /// The timeout for establishing a connection in a fetch.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: None,
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            caches: CacheConfig::default(),
            max_download_timeout: Duration::from_secs(5 * 60),
            connect_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.caches, CacheConfig::default());
        assert_eq!(cfg.caches.max_disk_size, 50 * 1024 * 1024);
        assert_eq!(cfg.caches.max_age, Duration::from_secs(7 * 24 * 3600));

        // Setting a single limit keeps the others at their defaults.
        let yaml = r#"
            caches:
              max_age: 1h
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.caches.max_age, Duration::from_secs(3600));
        assert_eq!(cfg.caches.max_disk_size, 50 * 1024 * 1024);
        assert_eq!(cfg.caches.namespace, "objects");
    }

    #[test]
    fn test_cache_dir() {
        let yaml = r#"
            cache_dir: /tmp/tiercache
            caches:
              namespace: images
              max_disk_size: 1024
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.cache_dir, Some(PathBuf::from("/tmp/tiercache")));
        assert_eq!(cfg.caches.namespace, "images");
        assert_eq!(cfg.caches.max_disk_size, 1024);

        assert_eq!(Config::default().cache_dir, None);
    }

    #[test]
    fn test_logging_level() {
        let yaml = r#"
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);

        let yaml = r#"
            logging:
              level: loud
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_zero_second_dl_timeouts() {
        // 0s download timeouts will not be set to defaults
        let yaml = r#"
            max_download_timeout: 0s
            connect_timeout: 0s
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.max_download_timeout, Duration::from_secs(0));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(0));
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            caches:
              not_a_limit: 1h
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
