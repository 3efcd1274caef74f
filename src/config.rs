//! Configuration management for Chunkwise

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::upload::{UploadOptions, DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub storage: StorageConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base used when building the URL of a merged file
    pub public_base_url: String,
    /// Largest accepted chunk request body
    pub max_chunk_bytes: usize,
}

/// Limits for the upload policy: global bucket, per-origin bucket,
/// per-identity sliding window
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub global_capacity: f64,
    pub global_refill_per_sec: f64,
    pub ip_capacity: f64,
    pub ip_refill_per_sec: f64,
    pub user_max_requests: usize,
    pub user_window_secs: u64,
    /// Interval of the idle-key sweep
    pub cleanup_interval_secs: u64,
    /// Keys idle longer than this are evicted by the sweep
    pub max_idle_secs: u64,
}

impl RateLimitConfig {
    pub fn user_window(&self) -> Duration {
        Duration::from_secs(self.user_window_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON snapshot of upload state; in-memory only when unset
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub server_url: String,
    pub chunk_size: u64,
    pub concurrency: usize,
    pub max_retries: u32,
}

impl ClientConfig {
    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            chunk_size: self.chunk_size,
            concurrency: self.concurrency,
            max_retries: self.max_retries,
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{name} must be greater than zero")]
    NotPositive { name: &'static str },
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            global_capacity: 1000.0,
            global_refill_per_sec: 1000.0,
            ip_capacity: 20.0,
            ip_refill_per_sec: 20.0,
            user_max_requests: 100,
            user_window_secs: 60,
            cleanup_interval_secs: 300,
            max_idle_secs: 3600,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                public_base_url: "http://localhost:3000".to_string(),
                max_chunk_bytes: 16 * 1024 * 1024,
            },
            rate_limit: RateLimitConfig::default(),
            storage: StorageConfig { state_file: None },
            client: ClientConfig {
                server_url: "http://localhost:3000".to_string(),
                chunk_size: DEFAULT_CHUNK_SIZE,
                concurrency: DEFAULT_CONCURRENCY,
                max_retries: DEFAULT_MAX_RETRIES,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let limits = defaults.rate_limit;

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
                public_base_url: env::var("PUBLIC_BASE_URL")
                    .unwrap_or(defaults.server.public_base_url),
                max_chunk_bytes: parse_var("MAX_CHUNK_BYTES", defaults.server.max_chunk_bytes)?,
            },
            rate_limit: RateLimitConfig {
                global_capacity: parse_var("RATE_LIMIT_GLOBAL_CAPACITY", limits.global_capacity)?,
                global_refill_per_sec: parse_var("RATE_LIMIT_GLOBAL_REFILL", limits.global_refill_per_sec)?,
                ip_capacity: parse_var("RATE_LIMIT_IP_CAPACITY", limits.ip_capacity)?,
                ip_refill_per_sec: parse_var("RATE_LIMIT_IP_REFILL", limits.ip_refill_per_sec)?,
                user_max_requests: parse_var("RATE_LIMIT_USER_MAX", limits.user_max_requests)?,
                user_window_secs: parse_var("RATE_LIMIT_USER_WINDOW_SECS", limits.user_window_secs)?,
                cleanup_interval_secs: parse_var("RATE_LIMIT_CLEANUP_SECS", limits.cleanup_interval_secs)?,
                max_idle_secs: parse_var("RATE_LIMIT_MAX_IDLE_SECS", limits.max_idle_secs)?,
            },
            storage: StorageConfig {
                state_file: env::var("STATE_FILE").ok().map(PathBuf::from),
            },
            client: ClientConfig {
                server_url: env::var("UPLOAD_SERVER_URL").unwrap_or(defaults.client.server_url),
                chunk_size: parse_var("UPLOAD_CHUNK_SIZE", defaults.client.chunk_size)?,
                concurrency: parse_var("UPLOAD_CONCURRENCY", defaults.client.concurrency)?,
                max_retries: parse_var("UPLOAD_MAX_RETRIES", defaults.client.max_retries)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the limiters and uploader cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.rate_limit;
        let positive = [
            ("RATE_LIMIT_GLOBAL_CAPACITY", limits.global_capacity > 0.0),
            ("RATE_LIMIT_GLOBAL_REFILL", limits.global_refill_per_sec > 0.0),
            ("RATE_LIMIT_IP_CAPACITY", limits.ip_capacity > 0.0),
            ("RATE_LIMIT_IP_REFILL", limits.ip_refill_per_sec > 0.0),
            ("RATE_LIMIT_USER_MAX", limits.user_max_requests > 0),
            ("RATE_LIMIT_USER_WINDOW_SECS", limits.user_window_secs > 0),
            ("RATE_LIMIT_CLEANUP_SECS", limits.cleanup_interval_secs > 0),
            ("UPLOAD_CHUNK_SIZE", self.client.chunk_size > 0),
            ("UPLOAD_CONCURRENCY", self.client.concurrency > 0),
        ];

        match positive.iter().find(|(_, ok)| !ok) {
            Some((name, _)) => Err(ConfigError::NotPositive { name: *name }),
            None => Ok(()),
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_upload_policy() {
        let config = Config::default();
        assert_eq!(config.rate_limit.global_capacity, 1000.0);
        assert_eq!(config.rate_limit.ip_capacity, 20.0);
        assert_eq!(config.rate_limit.user_max_requests, 100);
        assert_eq!(config.rate_limit.user_window(), Duration::from_secs(60));
        assert_eq!(config.client.concurrency, 3);
        assert_eq!(config.client.max_retries, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = Config::default();
        config.client.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive { name: "UPLOAD_CHUNK_SIZE" })
        ));
    }

    #[test]
    fn test_upload_options() {
        let config = Config::default();
        let options = config.client.upload_options();
        assert_eq!(options.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(options.concurrency, DEFAULT_CONCURRENCY);
    }
}
