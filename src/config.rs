//! Configuration module
//!
//! A single TOML file, every section optional:
//!
//! ```toml
//! [server]
//! ws_port = 9000
//! api_port = 8080
//!
//! [gateway]
//! duplicate_connection_policy = "reject"
//!
//! [logging]
//! format = "json"
//! ```
//!
//! Lookup order: `--config` flag, `GATEWAY_CONFIG`, then
//! `~/.config/charge-gateway/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::charging::context::GatewaySettings;
use crate::application::relay::DuplicatePolicy;
use crate::infrastructure::crypto::jwt::JwtConfig;
use crate::infrastructure::database::DatabaseConfig;
use crate::shared::retry::RetryConfig;

pub const CONFIG_ENV_VAR: &str = "GATEWAY_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// `~/.config/charge-gateway/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("charge-gateway")
        .join("config.toml")
}

/// Explicit path, else `GATEWAY_CONFIG`, else the default location.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub settlement: SettlementConfig,
    pub database: DatabaseSection,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ws_host: String,
    pub ws_port: u16,
    pub api_host: String,
    pub api_port: u16,
    /// Seconds to wait for in-flight work on shutdown
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_host: "0.0.0.0".to_string(),
            ws_port: 9000,
            api_host: "0.0.0.0".to_string(),
            api_port: 8080,
            shutdown_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Seconds, returned in BootNotification
    pub heartbeat_interval: u32,
    pub call_timeout_secs: u64,
    pub relay_outcome_timeout_secs: u64,
    pub duplicate_connection_policy: DuplicatePolicy,
    pub transaction_log_capacity: usize,
    pub orphan_grace_period_secs: u64,
    pub orphan_check_interval_secs: u64,
    pub remote_id_tag: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: 300,
            call_timeout_secs: 30,
            relay_outcome_timeout_secs: 35,
            duplicate_connection_policy: DuplicatePolicy::Evict,
            transaction_log_capacity: 100,
            orphan_grace_period_secs: 600,
            orphan_check_interval_secs: 30,
            remote_id_tag: "GATEWAY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: DatabaseConfig::default().url,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        let jwt = JwtConfig::default();
        Self {
            jwt_secret: jwt.secret,
            jwt_issuer: jwt.issuer,
        }
    }
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("jwt_secret", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Overridden by `RUST_LOG`
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.gateway;
        if g.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid("gateway.call_timeout_secs must be > 0".into()));
        }
        if g.relay_outcome_timeout_secs < g.call_timeout_secs {
            return Err(ConfigError::Invalid(
                "gateway.relay_outcome_timeout_secs must be >= call_timeout_secs".into(),
            ));
        }
        if g.transaction_log_capacity == 0 {
            return Err(ConfigError::Invalid(
                "gateway.transaction_log_capacity must be > 0".into(),
            ));
        }
        if g.orphan_check_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "gateway.orphan_check_interval_secs must be > 0".into(),
            ));
        }
        if self.settlement.max_attempts == 0 {
            return Err(ConfigError::Invalid("settlement.max_attempts must be > 0".into()));
        }
        if !matches!(self.logging.format.to_lowercase().as_str(), "text" | "json") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be text or json, got {}",
                self.logging.format
            )));
        }
        Ok(())
    }

    pub fn ws_address(&self) -> String {
        format!("{}:{}", self.server.ws_host, self.server.ws_port)
    }

    pub fn api_address(&self) -> String {
        format!("{}:{}", self.server.api_host, self.server.api_port)
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            heartbeat_interval: self.gateway.heartbeat_interval,
            call_timeout: Duration::from_secs(self.gateway.call_timeout_secs),
            duplicate_policy: self.gateway.duplicate_connection_policy,
            orphan_grace_period: Duration::from_secs(self.gateway.orphan_grace_period_secs),
            remote_id_tag: self.gateway.remote_id_tag.clone(),
        }
    }

    pub fn relay_outcome_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.relay_outcome_timeout_secs)
    }

    pub fn orphan_check_interval(&self) -> Duration {
        Duration::from_secs(self.gateway.orphan_check_interval_secs)
    }

    pub fn settlement_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.settlement.max_attempts,
            initial_delay: Duration::from_millis(self.settlement.initial_delay_ms),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(self.settlement.max_delay_ms),
        }
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.database.url.clone(),
        }
    }

    pub fn jwt_config(&self) -> JwtConfig {
        JwtConfig {
            secret: self.security.jwt_secret.clone(),
            issuer: self.security.jwt_issuer.clone(),
        }
    }
}
