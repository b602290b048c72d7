/*!
Mock MQTT Client pour développement sans broker

Remplace rumqttc::AsyncClient derrière le trait `CommandPublisher` du bridge :
enregistre les abonnements et les commandes publiées, peut simuler un broker
en panne, et injecte des événements transport dans la boucle d'ingestion.
*/

use anyhow::Result;
use prost::Message;
use rumqttc::QoS;
use sparkplug_bridge::bridge::TransportEvent;
use sparkplug_bridge::error::BridgeError;
use sparkplug_bridge::session::{now_millis, CommandPublisher};
use sparkplug_bridge::sparkplug::{datatype, metric, Metric, Payload, Template};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl MockMessage {
    /// Décode le payload Sparkplug de la commande publiée
    pub fn sparkplug(&self) -> Result<Payload> {
        Ok(Payload::decode(self.payload.as_slice())?)
    }
}

#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    event_sender: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    fail_publish: Arc<AtomicBool>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration d'un channel pour recevoir les événements simulés
    pub fn setup_receiver(&self, capacity: usize) -> mpsc::Receiver<TransportEvent> {
        let (sender, receiver) = mpsc::channel(capacity);
        *self.event_sender.lock().unwrap() = Some(sender);
        receiver
    }

    /// Simule un broker qui refuse les publications
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    async fn emit(&self, event: TransportEvent) -> Result<()> {
        let sender = self.event_sender.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(event).await.map_err(|e| anyhow::anyhow!("Send error: {}", e)),
            None => anyhow::bail!("no receiver configured, call setup_receiver first"),
        }
    }

    pub async fn simulate_connect(&self) -> Result<()> {
        log::info!("🔌 [MOCK] Simulated connect");
        self.emit(TransportEvent::Connected).await
    }

    pub async fn simulate_disconnect(&self, reason: &str) -> Result<()> {
        log::info!("🔌 [MOCK] Simulated disconnect: {}", reason);
        self.emit(TransportEvent::Disconnected { reason: reason.to_string() }).await
    }

    /// Simule la réception d'un message (pour tests)
    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let topic = topic.into();
        let payload: Vec<u8> = payload.into();
        log::info!("📨 [MOCK] Simulated incoming: {}", topic);
        self.emit(TransportEvent::Message { topic, payload: payload.into() }).await
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    /// Récupère les abonnements (pour assertions de tests)
    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Trouve les messages publiés sur un topic donné
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Reset tous les messages enregistrés
    pub fn clear(&self) {
        self.published_messages.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
    }
}

impl CommandPublisher for MockMqttClient {
    async fn subscribe(&self, topic: &str) -> sparkplug_bridge::error::Result<()> {
        self.subscriptions.lock().unwrap().push(topic.to_string());
        log::info!("📥 [MOCK] Subscribed to {}", topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> sparkplug_bridge::error::Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BridgeError::Publish { topic: topic.to_string(), reason: "mock broker offline".into() });
        }
        log::info!("📤 [MOCK] Published to {}: {} bytes", topic, payload.len());
        self.published_messages.lock().unwrap().push(MockMessage {
            topic: topic.to_string(),
            payload,
            qos: QoS::AtMostOnce,
            retain: false,
        });
        Ok(())
    }
}

/// Helper pour construire des batches Sparkplug B de test
#[derive(Debug, Clone)]
pub struct SparkplugPayloadBuilder {
    payload: Payload,
}

impl Default for SparkplugPayloadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SparkplugPayloadBuilder {
    pub fn new() -> Self {
        Self {
            payload: Payload { timestamp: Some(now_millis()), ..Default::default() },
        }
    }

    pub fn seq(mut self, seq: u64) -> Self {
        self.payload.seq = Some(seq);
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.payload.metrics.push(metric);
        self
    }

    pub fn boolean(self, name: &str, value: bool) -> Self {
        self.metric(typed(name, datatype::BOOLEAN, metric::Value::BooleanValue(value)))
    }

    pub fn double(self, name: &str, value: f64) -> Self {
        self.metric(double_metric(name, value))
    }

    pub fn int32(self, name: &str, value: i32) -> Self {
        self.metric(typed(name, datatype::INT32, metric::Value::IntValue(value as u32)))
    }

    pub fn string(self, name: &str, value: &str) -> Self {
        self.metric(typed(name, datatype::STRING, metric::Value::StringValue(value.to_string())))
    }

    /// Métrique de birth avec nom + alias
    pub fn aliased_double(self, name: &str, alias: u64, value: f64) -> Self {
        let mut m = double_metric(name, value);
        m.alias = Some(alias);
        self.metric(m)
    }

    /// Métrique de data publiée uniquement par alias
    pub fn alias_only_double(self, alias: u64, value: f64) -> Self {
        let mut m = double_metric("", value);
        m.name = None;
        m.alias = Some(alias);
        self.metric(m)
    }

    /// Entrée invalide : aucune variante de valeur
    pub fn without_value(self, name: &str) -> Self {
        self.metric(Metric {
            name: Some(name.to_string()),
            datatype: Some(datatype::DOUBLE),
            timestamp: Some(now_millis()),
            ..Default::default()
        })
    }

    pub fn template(self, name: &str, inner: Vec<Metric>) -> Self {
        self.metric(Metric {
            name: Some(name.to_string()),
            datatype: Some(datatype::TEMPLATE),
            timestamp: Some(now_millis()),
            value: Some(metric::Value::TemplateValue(Template { metrics: inner, ..Default::default() })),
            ..Default::default()
        })
    }

    pub fn build(self) -> Payload {
        self.payload
    }

    pub fn encode(self) -> Vec<u8> {
        self.payload.encode_to_vec()
    }
}

pub fn double_metric(name: &str, value: f64) -> Metric {
    typed(name, datatype::DOUBLE, metric::Value::DoubleValue(value))
}

fn typed(name: &str, dt: u32, value: metric::Value) -> Metric {
    Metric {
        name: Some(name.to_string()),
        timestamp: Some(now_millis()),
        datatype: Some(dt),
        value: Some(value),
        ..Default::default()
    }
}
