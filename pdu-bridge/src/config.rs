use crate::error::ConfigError;
use crate::topics::BRIDGE_SEGMENT;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "PDU_BRIDGE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "pdu-bridge.yaml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mqtt: MqttConf,
    #[serde(default)]
    pub bridge: PublishConf,
    #[serde(default)]
    pub pdus: Vec<DeviceConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub topic_prefix: String,
    pub discovery_prefix: String,
    pub retain: bool,
    pub keep_alive_secs: u64,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            username: None,
            password: None,
            client_id: "pdu-bridge".into(),
            topic_prefix: "pdu".into(),
            discovery_prefix: "homeassistant".into(),
            retain: true,
            keep_alive_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PublishConf {
    pub publish_interval_secs: u64,
    pub discovery: bool,
    /// Interval between warnings while shutdown waits for running commands
    pub shutdown_grace_secs: u64,
}

impl Default for PublishConf {
    fn default() -> Self {
        Self {
            publish_interval_secs: 30,
            discovery: true,
            shutdown_grace_secs: 10,
        }
    }
}

/// PDU families sharing a wire protocol. `Auto` resolves to LogiLink.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    #[default]
    Auto,
    Logilink,
    Intellinet,
}

impl DeviceFamily {
    pub fn manufacturer(&self) -> &'static str {
        match self {
            DeviceFamily::Auto => "LogiLink/Intellinet",
            DeviceFamily::Logilink => "LogiLink",
            DeviceFamily::Intellinet => "Intellinet",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeviceConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default)]
    pub model: DeviceFamily,
    /// Poll interval in seconds
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_username() -> String {
    "admin".into()
}

fn default_password() -> String {
    "admin".into()
}

fn default_scan_interval() -> u64 {
    30
}

fn default_timeout() -> u64 {
    10
}

fn default_retry_attempts() -> u32 {
    3
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            username: default_username(),
            password: default_password(),
            model: DeviceFamily::default(),
            scan_interval: default_scan_interval(),
            timeout: default_timeout(),
            retry_attempts: default_retry_attempts(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidDevice {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if !is_topic_safe(&self.name) {
            return Err(invalid("name must not contain '/', '+', '#' or whitespace"));
        }
        if self.name == BRIDGE_SEGMENT {
            return Err(invalid("name is reserved for the bridge's own topics"));
        }
        if self.host.trim().is_empty() {
            return Err(invalid("host is empty"));
        }
        if self.scan_interval == 0 {
            return Err(invalid("scan_interval must be greater than zero"));
        }
        if self.timeout == 0 {
            return Err(invalid("timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Device names end up as MQTT topic levels.
pub fn is_topic_safe(segment: &str) -> bool {
    !segment.is_empty()
        && !segment
            .chars()
            .any(|c| c == '/' || c == '+' || c == '#' || c.is_whitespace())
}

impl BridgeConfig {
    pub fn parse(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(txt)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for pdu in &self.pdus {
            pdu.validate()?;
            if !seen.insert(pdu.name.as_str()) {
                return Err(ConfigError::DuplicateDevice(pdu.name.clone()));
            }
        }
        for (key, prefix) in [
            ("mqtt.topic_prefix", &self.mqtt.topic_prefix),
            ("mqtt.discovery_prefix", &self.mqtt.discovery_prefix),
        ] {
            // prefixes may span several levels, but no wildcards; a trailing '/' is dropped
            if !prefix.trim_end_matches('/').split('/').all(is_topic_safe) {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    value: prefix.clone(),
                });
            }
        }
        Ok(())
    }

    /// Bus settings from the environment win over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "MQTT_PORT".into(),
                value: port.clone(),
            })?;
        }
        if let Some(user) = lookup("MQTT_USER").filter(|u| !u.is_empty()) {
            self.mqtt.username = Some(user);
        }
        if let Some(password) = lookup("MQTT_PASSWORD").filter(|p| !p.is_empty()) {
            self.mqtt.password = Some(password);
        }
        if let Some(topic) = lookup("MQTT_TOPIC").filter(|t| !t.is_empty()) {
            self.mqtt.topic_prefix = topic;
        }
        Ok(())
    }

    /// Smallest per-device poll interval: the scheduler's tick.
    pub fn scheduler_tick(&self) -> Duration {
        self.pdus
            .iter()
            .map(DeviceConfig::poll_interval)
            .min()
            .unwrap_or(Duration::from_secs(default_scan_interval()))
    }
}

pub async fn load_config() -> Result<BridgeConfig, ConfigError> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        info!("loaded configuration from {}", path);
        BridgeConfig::parse(&txt)?
    } else {
        warn!("no {} found, using default configuration", path);
        BridgeConfig::default()
    };

    cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
