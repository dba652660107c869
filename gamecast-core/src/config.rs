use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Base URL used when building share links. Falls back to the request's
    /// `Host` header when unset.
    pub public_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            public_base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Session relay tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// How often the reaper sweeps the directory
    pub sweep_interval_seconds: u64,
    /// Sessions idle for longer than this are evicted
    pub max_idle_seconds: u64,
    /// Sessions older than this are evicted regardless of activity
    pub max_age_seconds: u64,
    /// Frames buffered per connection before it counts as too slow
    pub outbound_queue_capacity: usize,
    /// Upper bound on a single socket write
    pub write_timeout_ms: u64,
    /// Largest inbound WebSocket message accepted
    pub max_frame_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 300,
            max_idle_seconds: 2 * 3600,
            max_age_seconds: 12 * 3600,
            outbound_queue_capacity: 64,
            write_timeout_ms: 5000,
            max_frame_bytes: 1024 * 1024,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    #[must_use]
    pub const fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_seconds)
    }

    #[must_use]
    pub const fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }

    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
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

        // GAMECAST_SERVER__HTTP_PORT, GAMECAST_RELAY__MAX_IDLE_SECONDS, ...
        builder = builder.add_source(
            Environment::with_prefix("GAMECAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut config: Self = config.try_deserialize()?;

        // Cloud platforms (Fly.io and friends) hand the port over in PORT
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.server.http_port = port;
        }

        Ok(config)
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check the configuration for values the relay cannot run with.
    ///
    /// Returns every problem found rather than stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if let Some(base) = &self.server.public_base_url {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                errors.push(format!(
                    "server.public_base_url must start with http:// or https://, got {base}"
                ));
            }
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {}",
                self.logging.format
            ));
        }

        let relay = &self.relay;
        if relay.sweep_interval_seconds == 0 {
            errors.push("relay.sweep_interval_seconds must be non-zero".to_string());
        }
        if relay.max_idle_seconds == 0 {
            errors.push("relay.max_idle_seconds must be non-zero".to_string());
        }
        if relay.max_age_seconds == 0 {
            errors.push("relay.max_age_seconds must be non-zero".to_string());
        }
        if relay.outbound_queue_capacity == 0 {
            errors.push("relay.outbound_queue_capacity must be non-zero".to_string());
        }
        if relay.write_timeout_ms == 0 {
            errors.push("relay.write_timeout_ms must be non-zero".to_string());
        }
        if relay.max_frame_bytes == 0 {
            errors.push("relay.max_frame_bytes must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.relay.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.relay.max_idle(), Duration::from_secs(2 * 3600));
        assert_eq!(config.relay.max_age(), Duration::from_secs(12 * 3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_address() {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                http_port: 9090,
                public_base_url: None,
            },
            logging: LoggingConfig::default(),
            relay: RelayConfig::default(),
        };

        assert_eq!(config.http_address(), "127.0.0.1:9090");
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.server.public_base_url = Some("ftp://example.com".to_string());
        config.logging.format = "xml".to_string();
        config.relay.outbound_queue_capacity = 0;
        config.relay.sweep_interval_seconds = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("public_base_url")));
        assert!(errors.iter().any(|e| e.contains("logging.format")));
    }
}
