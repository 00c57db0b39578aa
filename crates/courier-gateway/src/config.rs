//! Configuration for the courier gateway.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Device registry storage configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Device reconciler configuration
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Administrative endpoints
    #[serde(default)]
    pub admin: AdminConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Path to the JSON registry file
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,

    /// Enable persistence (if false, registry is in-memory only)
    #[serde(default = "default_true")]
    pub persist: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// Deadline for each registry round trip
    #[serde(default = "default_storage_timeout", with = "humantime_serde")]
    pub storage_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Global requests per minute
    #[serde(default = "default_global_rpm")]
    pub global_per_minute: u32,

    /// Requests per minute from one client address
    #[serde(default = "default_per_client_rpm")]
    pub per_client_per_minute: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Token required by the device reset endpoint; unset disables it
    #[serde(default)]
    pub token: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
            persist: true,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            storage_timeout: default_storage_timeout(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_minute: default_global_rpm(),
            per_client_per_minute: default_per_client_rpm(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8082
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("/data/courier-devices.json")
}

fn default_true() -> bool {
    true
}

fn default_storage_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_global_rpm() -> u32 {
    120
}

fn default_per_client_rpm() -> u32 {
    30
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.server.port, 8082);
        assert!(config.registry.persist);
        assert_eq!(config.reconciler.storage_timeout, Duration::from_secs(2));
        assert_eq!(config.rate_limit.global_per_minute, 120);
        assert_eq!(config.rate_limit.per_client_per_minute, 30);
        assert!(config.admin.token.is_none());
        assert_eq!(config.log.format, LogFormat::Pretty);
    }

    #[test]
    fn test_overrides() {
        let config: Config = serde_json::from_str(
            r#"{
                "registry": { "path": "/tmp/devices.json", "persist": false },
                "reconciler": { "storage_timeout": "500ms" },
                "rate_limit": { "per_client_per_minute": 5 },
                "admin": { "token": "s3cret" },
                "log": { "level": "debug", "format": "json" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.registry.path, PathBuf::from("/tmp/devices.json"));
        assert!(!config.registry.persist);
        assert_eq!(config.reconciler.storage_timeout, Duration::from_millis(500));
        assert_eq!(config.rate_limit.global_per_minute, 120);
        assert_eq!(config.rate_limit.per_client_per_minute, 5);
        assert_eq!(config.admin.token.unwrap().expose_secret(), "s3cret");
        assert_eq!(config.log.format, LogFormat::Json);
    }
}
