//! Application configuration loaded from environment variables.

use std::time::Duration;

use outbox::{PublisherConfig, RelayConfig, RetryPolicy};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Relay configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for human-readable output
/// - `DATABASE_URL`: Postgres outbox; in-memory when unset
/// - `REDIS_URL`: Redis downstream queue; in-memory when unset
/// - `OUTBOX_BATCH_SIZE` (default: `100`)
/// - `OUTBOX_POLL_INTERVAL_MS` (default: `500`)
/// - `OUTBOX_PUBLISH_TIMEOUT_MS` (default: `5000`)
/// - `OUTBOX_MAX_ATTEMPTS` (default: `5`)
/// - `OUTBOX_RETENTION_DAYS` (default: `7`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub publish_timeout: Duration,
    pub max_attempts: u32,
    pub retention_days: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`; unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => defaults.log_format,
            },
            database_url: non_empty("DATABASE_URL"),
            redis_url: non_empty("REDIS_URL"),
            batch_size: parsed("OUTBOX_BATCH_SIZE")
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.batch_size),
            poll_interval: parsed("OUTBOX_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            publish_timeout: parsed("OUTBOX_PUBLISH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.publish_timeout),
            max_attempts: parsed("OUTBOX_MAX_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            retention_days: parsed("OUTBOX_RETENTION_DAYS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.retention_days),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            batch_size: self.batch_size,
            publish_timeout: self.publish_timeout,
            ..PublisherConfig::default()
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: self.poll_interval,
            retry_ceiling: self.retry_policy().retry_ceiling(),
            retention_days: self.retention_days,
            ..RelayConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            redis_url: None,
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
            publish_timeout: Duration::from_secs(5),
            max_attempts: 5,
            retention_days: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from_pairs(&[]);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.database_url, None);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_attempts, 5);
        assert!(config.relay_config().retry_ceiling > config.retry_policy().max_attempts);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/outbox"),
            ("REDIS_URL", ""),
            ("OUTBOX_BATCH_SIZE", "25"),
            ("OUTBOX_POLL_INTERVAL_MS", "50"),
            ("OUTBOX_MAX_ATTEMPTS", "9"),
            ("OUTBOX_RETENTION_DAYS", "30"),
        ]);

        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/outbox"));
        assert_eq!(config.redis_url, None);
        assert_eq!(config.publisher_config().batch_size, 25);
        assert_eq!(config.relay_config().poll_interval, Duration::from_millis(50));
        assert_eq!(config.retry_policy().max_attempts, 9);
        assert_eq!(config.relay_config().retry_ceiling, 18);
        assert_eq!(config.relay_config().retention_days, 30);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = from_pairs(&[("OUTBOX_BATCH_SIZE", "0"), ("OUTBOX_MAX_ATTEMPTS", "many")]);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
