/*!
Test Harness pour le bridge Sparkplug

Facilite l'écriture de tests bout en bout avec:
- Pipeline complet câblé sur le stub MQTT (session, ingestion, store, hub)
- Abonnés simulés branchés sur le registre
- Assertions sur les commandes rebirth publiées
*/

use crate::mqtt_stub::{MockMessage, MockMqttClient};
use anyhow::Result;
use sparkplug_bridge::bridge::{Bridge, IngestReport, Ingestor, TransportEvent};
use sparkplug_bridge::config::BridgeConfig;
use sparkplug_bridge::flatten::TemplateFlattener;
use sparkplug_bridge::health::HealthTracker;
use sparkplug_bridge::http::AppState;
use sparkplug_bridge::hub::{self, BroadcastHub, BroadcastSender};
use sparkplug_bridge::session::{SessionController, SessionSettings};
use sparkplug_bridge::store::MetricStore;
use sparkplug_bridge::subscribers::{SubscriberHandle, SubscriberRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Harness de test complet pour le bridge
pub struct TestHarness {
    pub config: BridgeConfig,
    pub mqtt_client: MockMqttClient,
    pub store: Arc<MetricStore>,
    pub registry: Arc<SubscriberRegistry>,
    pub session: Arc<SessionController<MockMqttClient>>,
    pub health: HealthTracker,
    pub broadcast: BroadcastSender,
    bridge: Bridge<MockMqttClient>,
    hub: Option<BroadcastHub>,
}

impl TestHarness {
    /// Crée un harness avec une configuration de test (délais rebirth courts)
    pub fn new() -> Self {
        Self::with_config(Self::test_config())
    }

    pub fn test_config() -> BridgeConfig {
        let mut cfg = BridgeConfig::default();
        cfg.sparkplug.group_id = "Plant".into();
        cfg.sparkplug.edge_node_id = "Edge1".into();
        cfg.rebirth.settle_delay_ms = 10;
        cfg.rebirth.device_delay_ms = 10;
        cfg
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        let mqtt_client = MockMqttClient::new();
        let health = HealthTracker::new();
        let store = Arc::new(MetricStore::new(config.store.policy));
        let registry = Arc::new(SubscriberRegistry::new(config.broadcast.subscriber_queue));
        let (broadcast, hub) = hub::channel(config.broadcast.queue_capacity);

        let session = Arc::new(SessionController::new(
            Arc::new(mqtt_client.clone()),
            SessionSettings::from_config(&config),
        ));
        let ingestor = Ingestor::new(
            Arc::clone(&store),
            TemplateFlattener::new(config.templates.allow_list.clone()),
            broadcast.clone(),
            health.clone(),
        );
        let bridge = Bridge::new(Arc::clone(&session), ingestor, health.clone());

        Self {
            config,
            mqtt_client,
            store,
            registry,
            session,
            health,
            broadcast,
            bridge,
            hub: Some(hub),
        }
    }

    /// Démarre le consommateur du hub ; sans lui les broadcasts restent en file
    pub fn start_hub(&mut self) {
        if let Some(hub) = self.hub.take() {
            hub.spawn(Arc::clone(&self.registry));
            log::info!("📡 Broadcast hub started");
        }
    }

    pub async fn connect(&mut self) {
        self.bridge.handle_event(TransportEvent::Connected).await;
    }

    pub async fn disconnect(&mut self, reason: &str) {
        self.bridge
            .handle_event(TransportEvent::Disconnected { reason: reason.to_string() })
            .await;
    }

    /// Injecte un message comme s'il venait du broker
    pub async fn send(&mut self, topic: &str, payload: Vec<u8>) -> Option<IngestReport> {
        self.bridge
            .handle_event(TransportEvent::Message { topic: topic.to_string(), payload: payload.into() })
            .await
    }

    /// Topic Sparkplug du node configuré, pour un type de message donné
    pub fn node_topic(&self, message_type: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.config.sparkplug.namespace, self.config.sparkplug.group_id, message_type, self.config.sparkplug.edge_node_id
        )
    }

    pub fn device_topic(&self, message_type: &str, device: &str) -> String {
        format!("{}/{}", self.node_topic(message_type), device)
    }

    /// Branche un abonné simulé sur le registre
    pub fn join(&self) -> (SubscriberHandle, mpsc::Receiver<String>) {
        self.registry.join(&self.store)
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            lifecycle: self.session.lifecycle(),
            health_tracker: self.health.clone(),
            broadcast: self.broadcast.clone(),
        }
    }

    /// Attend qu'au moins `count` messages soient publiés sur un topic
    pub async fn wait_for_published(&self, topic: &str, count: usize, timeout_ms: u64) -> Result<Vec<MockMessage>> {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            let messages = self.mqtt_client.find_messages_by_topic(topic);
            if messages.len() >= count {
                log::info!("✅ {} message(s) published on {}", messages.len(), topic);
                return Ok(messages);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        log::warn!("⏰ Timeout waiting for message on {}", topic);
        anyhow::bail!("expected {} message(s) on {}", count, topic)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Reçoit la prochaine ligne d'un abonné, avec timeout
pub async fn recv_line(rx: &mut mpsc::Receiver<String>, timeout_ms: u64) -> Result<String> {
    match timeout(Duration::from_millis(timeout_ms), rx.recv()).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => anyhow::bail!("subscriber queue closed"),
        Err(_) => anyhow::bail!("timeout waiting for subscriber line"),
    }
}

/// Vide ce qui est déjà en file pour un abonné
pub fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}
