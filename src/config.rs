//! Publisher configuration
//!
//! Configuration is read from an optional TOML file and the process
//! environment. The broker URL is deliberately NOT resolved at load time:
//! it is looked up every time `connect()` runs, so a missing URL surfaces as
//! a configuration error from `connect()` rather than from startup parsing.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable holding the broker URL unless overridden
pub const DEFAULT_BROKER_URL_ENV: &str = "RABBITMQ_URL";

/// Top-level publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PublisherConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Identity of the emitting service, used in logs and health output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Port for the HTTP health server (default: 8080)
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            health_port: default_health_port(),
        }
    }
}

/// Broker connection section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Environment variable containing the broker URL
    #[serde(default = "default_url_env")]
    pub url_env: String,
    /// Inline broker URL; takes precedence over `url_env` when set
    pub url: Option<String>,
    /// Upper bound for opening the transport connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url_env: default_url_env(),
            url: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Reconnection policy section: fixed attempt count, fixed delay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}

fn default_service_name() -> String {
    "notification-publisher".to_string()
}

fn default_health_port() -> u16 {
    8080
}

fn default_url_env() -> String {
    DEFAULT_BROKER_URL_ENV.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay_secs() -> u64 {
    5
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Broker URL is not set (expected in environment variable {0})")]
    MissingBrokerUrl(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PublisherConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PublisherConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.broker.url_env.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.url_env must name an environment variable".to_string(),
            ));
        }
        Ok(())
    }
}

impl BrokerSection {
    /// Resolve the broker URL from the inline value or the environment.
    ///
    /// Empty values count as missing.
    pub fn resolve_url(&self) -> Result<String, ConfigError> {
        let raw = self
            .url
            .clone()
            .or_else(|| std::env::var(&self.url_env).ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::MissingBrokerUrl(self.url_env.clone()))?;

        validate_broker_url(&raw)?;
        Ok(raw)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Accept only AMQP URLs with a host
fn validate_broker_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|_| ConfigError::InvalidBrokerUrl(redact_url(raw)))?;

    let has_host = url.host_str().is_some_and(|host| !host.is_empty());
    if !matches!(url.scheme(), "amqp" | "amqps") || !has_host {
        return Err(ConfigError::InvalidBrokerUrl(redact_url(raw)));
    }
    Ok(())
}

/// Strip credentials from a broker URL before it reaches a log line
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<unparsable>".to_string(),
    }
}
