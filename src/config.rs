//! Bridge configuration
//!
//! Configuration is an explicit value object loaded once at startup from a TOML file,
//! then overridden by environment variables. Every component receives the section it
//! needs at construction; nothing reads configuration globals later.

use crate::protocol::validate_topic_filter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Largest packet MQTT can encode (remaining length of 268,435,455 bytes)
pub const MQTT_MAX_PACKET_SIZE: usize = 268_435_455;

/// Files tried, in order, when no `--config` is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["bridge.toml", "config/bridge.toml"];

/// Main bridge configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// Broker connection and subscription settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker host name or address
    #[serde(default = "default_host")]
    pub host: String,
    /// Broker TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keepalive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Client identifier; a random `mqtt_bridge_<hex>` id is generated when absent
    pub client_id: Option<String>,
    /// Environment variable containing the username
    #[serde(default = "default_username_env")]
    pub username_env: Option<String>,
    /// Environment variable containing the password
    #[serde(default = "default_password_env")]
    pub password_env: Option<String>,
    /// Topic (or topic filter) to subscribe to
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Requested subscription QoS (0, 1 or 2)
    #[serde(default)]
    pub qos: u8,
    /// How long `connect()` waits for the first ConnAck
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Largest incoming packet accepted; rumqttc drops the connection on anything bigger
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keepalive() -> u64 {
    60
}

fn default_username_env() -> Option<String> {
    Some("MQTT_USERNAME".to_string())
}

fn default_password_env() -> Option<String> {
    Some("MQTT_PASSWORD".to_string())
}

fn default_topic() -> String {
    "test/topic".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_packet_size() -> usize {
    MQTT_MAX_PACKET_SIZE
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keepalive_secs: default_keepalive(),
            client_id: None,
            username_env: default_username_env(),
            password_env: default_password_env(),
            topic: default_topic(),
            qos: 0,
            connect_timeout_secs: default_connect_timeout(),
            max_packet_size: default_max_packet_size(),
        }
    }
}

impl BrokerSection {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Credentials are only used when both username and password resolve to non-empty values
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = get_env_var_optional(self.username_env.as_ref())?;
        let password = get_env_var_optional(self.password_env.as_ref())?;
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some((username, password))
    }
}

/// Outbound HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSection {
    /// Endpoint receiving a POST per validated message
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_endpoint_url() -> String {
    "http://localhost:3000/ttc/api/offense-move".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ApiSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Reconnection backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed (0.0 disables jitter)
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// Maximum reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_ratio() -> f64 {
    0.25
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_ratio: default_jitter_ratio(),
            max_attempts: None,
        }
    }
}

/// What happens when a message arrives and the work queue is full
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
    /// Evict the oldest queued message to make room for the new one
    #[default]
    DropOldest,
    /// Discard the incoming message
    DropNewest,
    /// Wait for space; stalls the broker event loop while the queue is full
    Block,
}

/// Work queue between the broker event loop and the delivery workers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSection {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub full_policy: QueueFullPolicy,
    /// Number of delivery workers; 1 keeps strict arrival ordering
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_capacity() -> usize {
    256
}

fn default_workers() -> usize {
    1
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            full_policy: QueueFullPolicy::default(),
            workers: default_workers(),
        }
    }
}

/// Optional HTTP health endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_health_port() -> u16 {
    8080
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_health_port(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar { name: String, value: String },
    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load configuration from TOML file, apply environment overrides and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        config.finish()
    }

    /// Build configuration from defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        BridgeConfig::default().finish()
    }

    /// Resolve the configuration the way the CLI does
    ///
    /// An explicit path must exist. Without one, the first of [`DEFAULT_CONFIG_PATHS`]
    /// that exists is loaded; if none does, built-in defaults are used. Environment
    /// overrides apply in every case. Returns the file that was used, if any.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load_from_file(path)?, Some(path.to_path_buf())));
        }

        let candidates: Vec<PathBuf> = DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).collect();
        match find_config_file(&candidates) {
            Some(path) => Ok((Self::load_from_file(&path)?, Some(path))),
            None => Ok((Self::from_env()?, None)),
        }
    }

    fn finish(mut self) -> Result<Self, ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())?;
        self.validate()?;
        Ok(self)
    }

    /// Apply overrides from a variable lookup (the process environment in production)
    ///
    /// `MQTT_BROKER` accepts either a bare host or a `mqtt://host:port` URL.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(broker) = lookup("MQTT_BROKER").filter(|v| !v.is_empty()) {
            let (host, port) = parse_broker_address(&broker)?;
            self.broker.host = host;
            if let Some(port) = port {
                self.broker.port = port;
            }
        }
        if let Some(port) = lookup("MQTT_PORT").filter(|v| !v.is_empty()) {
            self.broker.port = parse_env_value("MQTT_PORT", &port)?;
        }
        if let Some(topic) = lookup("MQTT_TOPIC").filter(|v| !v.is_empty()) {
            self.broker.topic = topic;
        }
        if let Some(client_id) = lookup("MQTT_CLIENT_ID").filter(|v| !v.is_empty()) {
            self.broker.client_id = Some(client_id);
        }
        if let Some(url) = lookup("API_URL").filter(|v| !v.is_empty()) {
            self.api.endpoint_url = url;
        }
        if let Some(timeout) = lookup("API_TIMEOUT").filter(|v| !v.is_empty()) {
            self.api.timeout_ms = parse_env_value("API_TIMEOUT", &timeout)?;
        }
        Ok(())
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host must not be empty".to_string(),
            ));
        }
        validate_topic_filter(&self.broker.topic)
            .map_err(|e| ConfigError::InvalidConfig(format!("broker.topic: {e}")))?;
        if self.broker.qos > 2 {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.qos must be 0, 1 or 2 (got {})",
                self.broker.qos
            )));
        }
        if !(1..=MQTT_MAX_PACKET_SIZE).contains(&self.broker.max_packet_size) {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.max_packet_size must be between 1 and {MQTT_MAX_PACKET_SIZE}"
            )));
        }
        if self.broker.keepalive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.keepalive_secs must be greater than 0".to_string(),
            ));
        }

        let endpoint = Url::parse(&self.api.endpoint_url)
            .map_err(|_| ConfigError::InvalidEndpoint(self.api.endpoint_url.clone()))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEndpoint(self.api.endpoint_url.clone()));
        }
        if self.api.timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "api.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.initial_delay_ms == 0
            || self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms
        {
            return Err(ConfigError::InvalidConfig(
                "reconnect delays must satisfy 0 < initial_delay_ms <= max_delay_ms".to_string(),
            ));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_ratio) {
            return Err(ConfigError::InvalidConfig(
                "reconnect.jitter_ratio must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.reconnect.max_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "reconnect.max_attempts must be greater than 0 or omitted for unlimited"
                    .to_string(),
            ));
        }

        if self.queue.capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "queue.capacity must be greater than 0".to_string(),
            ));
        }
        if self.queue.workers == 0 {
            return Err(ConfigError::InvalidConfig(
                "queue.workers must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
host = "localhost"
port = 1883
topic = "test/topic"
client_id = "bridge-test"

[api]
endpoint_url = "http://localhost:3000/ttc/api/offense-move"
timeout_ms = 5000
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// First existing file among `candidates`
pub fn find_config_file(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|path| path.is_file()).cloned()
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

fn parse_env_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Split a broker address (`host` or `mqtt://host:port`) into host and optional port
pub fn parse_broker_address(value: &str) -> Result<(String, Option<u16>), ConfigError> {
    if !value.contains("://") {
        return Ok((value.to_string(), None));
    }

    let url = Url::parse(value).map_err(|_| ConfigError::InvalidEnvVar {
        name: "MQTT_BROKER".to_string(),
        value: value.to_string(),
    })?;
    let host = url.host_str().ok_or_else(|| ConfigError::InvalidEnvVar {
        name: "MQTT_BROKER".to_string(),
        value: value.to_string(),
    })?;
    Ok((host.to_string(), url.port()))
}
