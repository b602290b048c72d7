use crate::error::{BridgeError, Result};
use crate::store::UpdatePolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub mqtt: MqttConf,
    pub sparkplug: SparkplugConf,
    pub rebirth: RebirthConf,
    pub templates: TemplatesConf,
    pub http: HttpConf,
    pub broadcast: BroadcastConf,
    pub store: StoreConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    /// Remplace le wildcard `{namespace}/{group}/#` si renseigné
    pub subscribe_topic: Option<String>,
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SparkplugConf {
    pub namespace: String,
    pub group_id: String,
    pub edge_node_id: String,
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RebirthConf {
    /// Délai après subscribe avant la commande node (replay des retained)
    pub settle_delay_ms: u64,
    pub device_delay_ms: u64,
    pub device_rebirth: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TemplatesConf {
    pub allow_list: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub addr: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BroadcastConf {
    pub queue_capacity: usize,
    pub subscriber_queue: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StoreConf {
    pub policy: UpdatePolicy,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "sparkplug-bridge".into(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            subscribe_topic: None,
            reconnect_delay_ms: 2000,
        }
    }
}

impl Default for SparkplugConf {
    fn default() -> Self {
        Self {
            namespace: "spBv1.0".into(),
            group_id: "My MQTT Group".into(),
            edge_node_id: "Edge Node ed7c12".into(),
            device_id: None,
        }
    }
}

impl Default for RebirthConf {
    fn default() -> Self {
        Self { settle_delay_ms: 1500, device_delay_ms: 500, device_rebirth: false }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { addr: "0.0.0.0:8000".into() }
    }
}

impl Default for BroadcastConf {
    fn default() -> Self {
        Self { queue_capacity: 1024, subscriber_queue: 256 }
    }
}

impl BridgeConfig {
    pub fn subscribe_topic(&self) -> String {
        self.mqtt.subscribe_topic.clone().unwrap_or_else(|| {
            crate::topic::group_wildcard(&self.sparkplug.namespace, &self.sparkplug.group_id)
        })
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.rebirth.settle_delay_ms)
    }

    pub fn device_delay(&self) -> Duration {
        Duration::from_millis(self.rebirth.device_delay_ms)
    }

    /// Device ciblé par la commande DCMD, si le rebirth device est activé
    pub fn rebirth_device(&self) -> Option<&str> {
        if self.rebirth.device_rebirth {
            self.sparkplug.device_id.as_deref()
        } else {
            None
        }
    }

    /// Applique les variables `SPB_*` par-dessus la config fichier
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SPB_MQTT_HOST") { self.mqtt.host = v; }
        if let Some(v) = lookup("SPB_MQTT_PORT") { self.mqtt.port = parse_var("SPB_MQTT_PORT", &v)?; }
        if let Some(v) = lookup("SPB_MQTT_CLIENT_ID") { self.mqtt.client_id = v; }
        if let Some(v) = lookup("SPB_MQTT_USERNAME") { self.mqtt.username = non_empty(v); }
        if let Some(v) = lookup("SPB_MQTT_PASSWORD") { self.mqtt.password = non_empty(v); }
        if let Some(v) = lookup("SPB_MQTT_KEEP_ALIVE_SECS") {
            self.mqtt.keep_alive_secs = parse_var("SPB_MQTT_KEEP_ALIVE_SECS", &v)?;
        }
        if let Some(v) = lookup("SPB_MQTT_SUBSCRIBE_TOPIC") { self.mqtt.subscribe_topic = non_empty(v); }

        if let Some(v) = lookup("SPB_NAMESPACE") { self.sparkplug.namespace = v; }
        if let Some(v) = lookup("SPB_GROUP_ID") { self.sparkplug.group_id = v; }
        if let Some(v) = lookup("SPB_EDGE_NODE_ID") { self.sparkplug.edge_node_id = v; }
        if let Some(v) = lookup("SPB_DEVICE_ID") { self.sparkplug.device_id = non_empty(v); }

        if let Some(v) = lookup("SPB_DEVICE_REBIRTH") {
            self.rebirth.device_rebirth = parse_bool("SPB_DEVICE_REBIRTH", &v)?;
        }
        if let Some(v) = lookup("SPB_REBIRTH_SETTLE_MS") {
            self.rebirth.settle_delay_ms = parse_var("SPB_REBIRTH_SETTLE_MS", &v)?;
        }
        if let Some(v) = lookup("SPB_DEVICE_REBIRTH_DELAY_MS") {
            self.rebirth.device_delay_ms = parse_var("SPB_DEVICE_REBIRTH_DELAY_MS", &v)?;
        }

        if let Some(v) = lookup("SPB_TEMPLATE_ALLOWLIST") {
            self.templates.allow_list = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(v) = lookup("SPB_HTTP_ADDR") { self.http.addr = v; }
        if let Some(v) = lookup("SPB_BROADCAST_CAPACITY") {
            self.broadcast.queue_capacity = parse_var("SPB_BROADCAST_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("SPB_SUBSCRIBER_QUEUE") {
            self.broadcast.subscriber_queue = parse_var("SPB_SUBSCRIBER_QUEUE", &v)?;
        }
        if let Some(v) = lookup("SPB_STORE_POLICY") {
            self.store.policy = v.parse().map_err(BridgeError::Config)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sparkplug.group_id.is_empty() || self.sparkplug.edge_node_id.is_empty() {
            return Err(BridgeError::Config("group id and edge node id are required".into()));
        }
        if self.rebirth.device_rebirth && self.sparkplug.device_id.is_none() {
            warn!("[config] device rebirth enabled without SPB_DEVICE_ID, DCMD will not be sent");
        }
        if self.broadcast.queue_capacity == 0 || self.broadcast.subscriber_queue == 0 {
            return Err(BridgeError::Config("queue capacities must be positive".into()));
        }
        Ok(())
    }
}

fn non_empty(v: String) -> Option<String> {
    if v.trim().is_empty() { None } else { Some(v) }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BridgeError::Config(format!("{key}: invalid value '{value}'")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(BridgeError::Config(format!("{key}: invalid boolean '{value}'"))),
    }
}

/// Fichier YAML optionnel (SPB_BRIDGE_CONFIG, défaut bridge.yaml) puis surcharge env
pub async fn load_config() -> Result<BridgeConfig> {
    let path = std::env::var("SPB_BRIDGE_CONFIG").unwrap_or_else(|_| "bridge.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path)
            .await
            .map_err(|e| BridgeError::Config(format!("{path}: {e}")))?;
        if txt.trim().is_empty() {
            BridgeConfig::default()
        } else {
            serde_yaml::from_str(&txt).map_err(|e| BridgeError::Config(format!("{path}: {e}")))?
        }
    } else {
        info!("[config] no {path}, using defaults and environment");
        BridgeConfig::default()
    };

    cfg.apply_env(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
