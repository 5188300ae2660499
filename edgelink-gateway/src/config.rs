use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

pub const CONFIG_ENV_VAR: &str = "EDGELINK_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "gateway.yaml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub gateway: GatewayConf,
    pub mqtt: MqttConf,
    pub cloud: CloudConf,
    pub coap: CoapConf,
    pub redis: RedisConf,
    pub smtp: SmtpConf,
    pub analysis: AnalysisConf,
}

/// Feature flags and gateway-wide settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConf {
    pub location_id: String,
    pub enable_mqtt: bool,
    pub enable_coap: bool,
    pub enable_cloud: bool,
    pub enable_persistence: bool,
    pub enable_smtp: bool,
    pub enable_system_perf: bool,
    pub poll_cycles_secs: u64,
    pub default_qos: u8,
    pub alert_timeout_secs: u64,
}

impl Default for GatewayConf {
    fn default() -> Self {
        Self {
            location_id: "gatewaydevice".into(),
            enable_mqtt: true,
            enable_coap: false,
            enable_cloud: false,
            enable_persistence: false,
            enable_smtp: false,
            enable_system_perf: true,
            poll_cycles_secs: 60,
            default_qos: 0,
            alert_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    pub capacity: usize,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: None,
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            username: None,
            password: None,
            capacity: 64,
        }
    }
}

/// Second broker connection pointed at the cloud provider
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CloudConf {
    pub broker: MqttConf,
    pub base_topic: Option<String>,
}

impl Default for CloudConf {
    fn default() -> Self {
        Self {
            broker: MqttConf {
                client_id: Some("edgelink-cloud".into()),
                ..MqttConf::default()
            },
            base_topic: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CoapConf {
    pub bind: String,
}

impl Default for CoapConf {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5683".into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RedisConf {
    pub url: String,
    /// JSON snapshot for the in-memory store, used when redis is disabled
    pub snapshot_path: Option<String>,
    pub use_memory_store: bool,
}

impl Default for RedisConf {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
            snapshot_path: None,
            use_memory_store: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SmtpConf {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: String,
}

impl Default for SmtpConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 587,
            username: None,
            password: None,
            from: "gateway@localhost".into(),
            to: "operator@localhost".into(),
        }
    }
}

/// Humidity threshold policy, off unless explicitly enabled
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisConf {
    pub enabled: bool,
    pub humidity_floor: f32,
    pub humidity_ceiling: f32,
}

impl Default for AnalysisConf {
    fn default() -> Self {
        Self {
            enabled: false,
            humidity_floor: 30.0,
            humidity_ceiling: 50.0,
        }
    }
}

impl GatewayConfig {
    pub fn from_yaml(path: &str, txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut cfg: GatewayConfig =
            serde_yaml::from_str(txt).map_err(|source| ConfigError::Parse {
                path: path.to_string(),
                source,
            })?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Credentials may come from the environment (or `.env`) instead of the file.
    fn apply_env(&mut self) {
        if let Ok(pw) = std::env::var("EDGELINK_MQTT_PASSWORD") {
            self.mqtt.password = Some(pw);
        }
        if let Ok(pw) = std::env::var("EDGELINK_CLOUD_PASSWORD") {
            self.cloud.broker.password = Some(pw);
        }
        if let Ok(pw) = std::env::var("EDGELINK_SMTP_PASSWORD") {
            self.smtp.password = Some(pw);
        }
    }
}

pub async fn load_config() -> Result<GatewayConfig, ConfigError> {
    let path = std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    if !Path::new(&path).exists() {
        tracing::warn!("No {} found, using default config", path);
        let mut cfg = GatewayConfig::default();
        cfg.apply_env();
        return Ok(cfg);
    }
    let txt = fs::read_to_string(&path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
    GatewayConfig::from_yaml(&path, &txt)
}
