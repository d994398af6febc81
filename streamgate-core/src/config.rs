use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::models::Stream;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
    pub playback: PlaybackConfig,
    pub rate_limit: RateLimitConfig,
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
    pub shutdown_timeout_seconds: u64,
    /// Empty means any origin
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_seconds: 60,
            shutdown_timeout_seconds: 15,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Empty means Redis is not configured
    pub url: String,
    pub key_prefix: String,
    pub connect_timeout_seconds: u64,
    /// Bound on every token-store and limiter round trip
    pub operation_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key_prefix: "streamgate:".to_string(),
            connect_timeout_seconds: 5,
            operation_timeout_ms: 2000,
        }
    }
}

impl RedisConfig {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }

    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file_path: None,
        }
    }
}

/// Which Token Store implementation to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenBackend {
    /// Redis when configured, otherwise in-process memory
    #[default]
    Auto,
    Memory,
    Redis,
    /// Issues tokens but accepts any token on validation. Local development only.
    InsecureStandalone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub token_ttl_seconds: u64,
    pub token_backend: TokenBackend,
    pub max_manifest_bytes: usize,
    pub upstream_timeout_seconds: u64,
    pub upstream_connect_timeout_seconds: u64,
    /// Sweep interval for expired in-memory tokens
    pub token_sweep_interval_seconds: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: 300,
            token_backend: TokenBackend::Auto,
            max_manifest_bytes: 4 * 1024 * 1024,
            upstream_timeout_seconds: 30,
            upstream_connect_timeout_seconds: 5,
            token_sweep_interval_seconds: 60,
        }
    }
}

impl PlaybackConfig {
    #[must_use]
    pub const fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }
}

/// Which admission strategy guards the edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Distributed when Redis is configured, otherwise local
    #[default]
    Auto,
    Local,
    Distributed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub strategy: RateLimitStrategy,
    /// Steady rate: this many requests refill per window
    pub requests_per_window: u32,
    /// Local bucket capacity; also the distributed per-window limit
    pub burst: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RateLimitStrategy::Auto,
            requests_per_window: 120,
            burst: 240,
            window_seconds: 60,
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Streams seeded into the in-memory catalog at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub streams: Vec<Stream>,
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // STREAMGATE_SERVER__PORT, STREAMGATE_RATE_LIMIT__BURST, ...
        builder = builder.add_source(
            Environment::with_prefix("STREAMGATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Collect every misconfiguration instead of stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if self.server.request_timeout_seconds == 0 {
            errors.push("server.request_timeout_seconds must be non-zero".to_string());
        }
        if self.logging.level.trim().is_empty() {
            errors.push("logging.level must not be empty".to_string());
        }
        if self.playback.token_ttl_seconds == 0 {
            errors.push("playback.token_ttl_seconds must be non-zero".to_string());
        }
        if self.playback.max_manifest_bytes == 0 {
            errors.push("playback.max_manifest_bytes must be non-zero".to_string());
        }
        if self.playback.token_backend == TokenBackend::Redis && !self.redis.is_configured() {
            errors.push("playback.token_backend = redis requires redis.url".to_string());
        }
        if self.rate_limit.enabled {
            if self.rate_limit.requests_per_window == 0 {
                errors.push("rate_limit.requests_per_window must be non-zero".to_string());
            }
            if self.rate_limit.burst == 0 {
                errors.push("rate_limit.burst must be non-zero".to_string());
            }
            if self.rate_limit.window_seconds == 0 {
                errors.push("rate_limit.window_seconds must be non-zero".to_string());
            }
            if self.rate_limit.strategy == RateLimitStrategy::Distributed
                && !self.redis.is_configured()
            {
                errors.push("rate_limit.strategy = distributed requires redis.url".to_string());
            }
        }

        let mut seen = HashSet::new();
        for stream in &self.catalog.streams {
            if stream.id.trim().is_empty() {
                errors.push("catalog stream with empty id".to_string());
            } else if !seen.insert(stream.id.as_str()) {
                errors.push(format!("duplicate catalog stream id \"{}\"", stream.id));
            }
            if !matches!(stream.origin_url.scheme(), "http" | "https") {
                errors.push(format!(
                    "stream \"{}\": origin_url must be http or https",
                    stream.id
                ));
            }
            if stream.origin_url.host_str().is_none() {
                errors.push(format!("stream \"{}\": origin_url has no host", stream.id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.playback.token_ttl(), Duration::from_secs(300));
        assert_eq!(config.rate_limit.requests_per_window, 120);
        assert_eq!(config.rate_limit.burst, 240);
        assert_eq!(config.redis.operation_timeout(), Duration::from_secs(2));
        assert!(!config.redis.is_configured());
    }

    #[test]
    fn test_http_address() {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 9090,
                ..ServerConfig::default()
            },
            ..Config::default()
        };
        assert_eq!(config.http_address(), "127.0.0.1:9090");
    }

    #[test]
    fn test_redis_backends_require_url() {
        let mut config = Config::default();
        config.playback.token_backend = TokenBackend::Redis;
        config.rate_limit.strategy = RateLimitStrategy::Distributed;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);

        config.redis.url = "redis://127.0.0.1:6379".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_disabled_rate_limit_skips_limit_checks() {
        let mut config = Config::default();
        config.rate_limit.enabled = false;
        config.rate_limit.burst = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml_file_with_catalog() {
        let yaml = r#"
server:
  port: 9000
playback:
  token_ttl_seconds: 120
  token_backend: memory
rate_limit:
  strategy: local
  burst: 10
catalog:
  streams:
    - id: stream-001
      slug: first-light
      title: First Light
      origin_url: https://cdn.test/path/master.m3u8
      allowed_hosts: [".media.test"]
      availability_start: 2024-01-01T00:00:00Z
"#;
        let dir = std::env::temp_dir().join(format!("streamgate-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(yaml.as_bytes())
            .unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.playback.token_ttl_seconds, 120);
        assert_eq!(config.playback.token_backend, TokenBackend::Memory);
        assert_eq!(config.rate_limit.strategy, RateLimitStrategy::Local);
        assert_eq!(config.rate_limit.burst, 10);
        assert_eq!(config.rate_limit.requests_per_window, 120);

        let stream = &config.catalog.streams[0];
        assert_eq!(stream.slug, "first-light");
        assert!(stream.is_visible);
        assert_eq!(stream.origin_url.host_str(), Some("cdn.test"));
        assert!(stream.availability_start.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_and_non_http_streams_rejected() {
        let yaml = r#"
catalog:
  streams:
    - id: dup
      origin_url: https://cdn.test/a.m3u8
    - id: dup
      origin_url: ftp://cdn.test/b.m3u8
"#;
        let config: Config = ConfigBuilder::builder()
            .add_source(File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate")));
        assert!(errors.iter().any(|e| e.contains("http or https")));
    }
}
