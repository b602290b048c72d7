/**
 * SESSION CONTROLLER - Séquence connect → subscribe → rebirth
 *
 * RÔLE :
 * À chaque (re)connexion le bridge n'a aucun état fiable : il force le node
 * (et optionnellement le device) à republier sa naissance complète.
 *
 * SÉQUENCE :
 * 1. subscribe au wildcard du groupe
 * 2. attente `settle_delay` (laisser passer le replay des retained)
 * 3. NCMD `Node Control/Rebirth = true`
 * 4. attente `device_delay` puis DCMD `Device Control/Rebirth = true` si configuré
 *
 * Une reconnexion annule la séquence en cours et la réarme. Les échecs de
 * publication sont loggés, sans retry.
 *
 * CYCLE DE VIE :
 * Table EntityId → {Unknown, BirthPending, Online, Offline} partagée avec l'API.
 */

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::sparkplug::{encode, rebirth_payload, DEVICE_REBIRTH_METRIC, NODE_REBIRTH_METRIC};
use crate::state::{new_state, Shared};
use crate::topic::{device_command_topic, node_command_topic, EntityId, MessageType, SparkplugTopic};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Sortie MQTT du contrôleur ; implémentée par rumqttc::AsyncClient et par le mock du devkit
pub trait CommandPublisher: Send + Sync + 'static {
    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<()>> + Send;
    fn publish(&self, topic: &str, payload: Vec<u8>) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unknown,
    BirthPending,
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEntry {
    #[serde(flatten)]
    pub entity: EntityId,
    pub state: LifecycleState,
}

#[derive(Debug, Default)]
pub struct LifecycleTable {
    entries: BTreeMap<EntityId, LifecycleState>,
}

impl LifecycleTable {
    pub fn get(&self, entity: &EntityId) -> LifecycleState {
        self.entries.get(entity).copied().unwrap_or(LifecycleState::Unknown)
    }

    pub fn set(&mut self, entity: EntityId, state: LifecycleState) {
        self.entries.insert(entity, state);
    }

    pub fn on_birth(&mut self, entity: &EntityId) {
        self.set(entity.clone(), LifecycleState::Online);
    }

    /// NDEATH entraîne aussi la mort de tous les devices connus du node
    pub fn on_death(&mut self, entity: &EntityId) {
        if entity.device.is_none() {
            for (id, state) in self.entries.iter_mut() {
                if id.node_of() == *entity {
                    *state = LifecycleState::Offline;
                }
            }
        }
        self.set(entity.clone(), LifecycleState::Offline);
    }

    /// Perte de la session MQTT : plus rien n'est garanti
    pub fn on_disconnect(&mut self) {
        for state in self.entries.values_mut() {
            if matches!(state, LifecycleState::Online | LifecycleState::BirthPending) {
                *state = LifecycleState::Unknown;
            }
        }
    }

    pub fn entries(&self) -> Vec<LifecycleEntry> {
        self.entries
            .iter()
            .map(|(entity, state)| LifecycleEntry { entity: entity.clone(), state: *state })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub namespace: String,
    pub group_id: String,
    pub edge_node_id: String,
    pub rebirth_device: Option<String>,
    pub subscribe_topic: String,
    pub settle_delay: Duration,
    pub device_delay: Duration,
}

impl SessionSettings {
    pub fn from_config(cfg: &BridgeConfig) -> Self {
        Self {
            namespace: cfg.sparkplug.namespace.clone(),
            group_id: cfg.sparkplug.group_id.clone(),
            edge_node_id: cfg.sparkplug.edge_node_id.clone(),
            rebirth_device: cfg.rebirth_device().map(str::to_string),
            subscribe_topic: cfg.subscribe_topic(),
            settle_delay: cfg.settle_delay(),
            device_delay: cfg.device_delay(),
        }
    }

    pub fn node_entity(&self) -> EntityId {
        EntityId::node(self.group_id.clone(), self.edge_node_id.clone())
    }

    pub fn device_entity(&self) -> Option<EntityId> {
        self.rebirth_device
            .as_ref()
            .map(|d| EntityId::device(self.group_id.clone(), self.edge_node_id.clone(), d.clone()))
    }
}

/// Commande rebirth effectivement publiée
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebirthSent {
    pub topic: String,
    pub timestamp_ms: u64,
}

pub fn now_millis() -> u64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
}

pub struct SessionController<P: CommandPublisher> {
    publisher: Arc<P>,
    settings: SessionSettings,
    lifecycle: Shared<LifecycleTable>,
    last_command_ts: AtomicU64,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl<P: CommandPublisher> SessionController<P> {
    pub fn new(publisher: Arc<P>, settings: SessionSettings) -> Self {
        Self {
            publisher,
            settings,
            lifecycle: new_state(LifecycleTable::default()),
            last_command_ts: AtomicU64::new(0),
            pending: Mutex::new(None),
        }
    }

    pub fn lifecycle(&self) -> Shared<LifecycleTable> {
        self.lifecycle.clone()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Session MQTT établie : subscribe puis arme la séquence rebirth
    pub async fn on_connected(self: &Arc<Self>) {
        let topic = &self.settings.subscribe_topic;
        match self.publisher.subscribe(topic).await {
            Ok(()) => info!(topic = %topic, "subscribed"),
            Err(e) => error!(error = %e, "subscribe failed"),
        }

        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.set(self.settings.node_entity(), LifecycleState::BirthPending);
            if let Some(device) = self.settings.device_entity() {
                lifecycle.set(device, LifecycleState::BirthPending);
            }
        }

        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            controller.rebirth_sequence().await;
        });
        if let Some(previous) = self.pending.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn on_disconnected(&self) {
        if let Some(pending) = self.pending.lock().take() {
            pending.abort();
        }
        self.lifecycle.lock().on_disconnect();
    }

    /// Observe un message entrant pour faire avancer le cycle de vie
    pub fn observe(&self, topic: &SparkplugTopic) {
        let entity = &topic.entity;
        match topic.message_type {
            MessageType::NBirth | MessageType::DBirth => {
                info!(entity = %entity, kind = topic.message_type.as_str(), "birth received");
                self.lifecycle.lock().on_birth(entity);
            }
            MessageType::NDeath | MessageType::DDeath => {
                warn!(entity = %entity, kind = topic.message_type.as_str(), "death received");
                self.lifecycle.lock().on_death(entity);
            }
            _ => {}
        }
    }

    /// Attend la stabilisation puis publie NCMD, et DCMD si configuré
    pub async fn rebirth_sequence(&self) -> Vec<RebirthSent> {
        let mut sent = Vec::new();

        tokio::time::sleep(self.settings.settle_delay).await;
        let topic = node_command_topic(&self.settings.namespace, &self.settings.group_id, &self.settings.edge_node_id);
        if let Some(s) = self.send_rebirth(topic, NODE_REBIRTH_METRIC).await {
            sent.push(s);
        }

        if let Some(device) = &self.settings.rebirth_device {
            tokio::time::sleep(self.settings.device_delay).await;
            let topic = device_command_topic(&self.settings.namespace, &self.settings.group_id, device);
            if let Some(s) = self.send_rebirth(topic, DEVICE_REBIRTH_METRIC).await {
                sent.push(s);
            }
        }
        sent
    }

    async fn send_rebirth(&self, topic: String, metric_name: &str) -> Option<RebirthSent> {
        let timestamp_ms = self.next_timestamp();
        let payload = encode(&rebirth_payload(metric_name, timestamp_ms));

        match self.publisher.publish(&topic, payload).await {
            Ok(()) => {
                info!(topic = %topic, metric = metric_name, "rebirth command sent");
                Some(RebirthSent { topic, timestamp_ms })
            }
            Err(e) => {
                error!(error = %e, "rebirth command not sent");
                None
            }
        }
    }

    /// Horodatage jamais inférieur à celui de la commande précédente
    fn next_timestamp(&self) -> u64 {
        let now = now_millis();
        let previous = self.last_command_ts.fetch_max(now, Ordering::SeqCst);
        let ts = previous.max(now);
        debug!(ts, "command timestamp");
        ts
    }
}
