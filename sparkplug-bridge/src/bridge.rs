/**
 * BRIDGE - Boucle d'ingestion séquentielle
 *
 * RÔLE :
 * Consomme les événements transport un par un, dans l'ordre de livraison :
 * - Connected → SessionController (subscribe + rebirth)
 * - Message → décodage → store → flattener → hub
 * - Disconnected → annulation de la séquence rebirth, cycle de vie remis à Unknown
 *
 * CONTRAINTES :
 * - Tout le chemin d'un message est synchrone : décodage, écriture store, `offer`
 * - Jamais d'attente sur un envoi à un abonné (le hub s'en charge)
 * - Un batch invalide ne touche ni le store ni le hub
 */

use crate::decoder;
use crate::error::{BridgeError, Result};
use crate::flatten::TemplateFlattener;
use crate::health::HealthTracker;
use crate::hub::{BroadcastMessage, BroadcastSender};
use crate::models::{render_line, MetricRecord, MetricValue};
use crate::session::{CommandPublisher, SessionController};
use crate::store::MetricStore;
use crate::topic::{EntityId, MessageType, SparkplugTopic};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Événements poussés par l'adaptateur MQTT
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Message { topic: String, payload: Bytes },
    Disconnected { reason: String },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub stored: usize,
    pub broadcast: usize,
    pub skipped: usize,
}

/// Alias numériques appris dans les births, par entité
#[derive(Debug, Default)]
pub struct AliasTable {
    aliases: HashMap<EntityId, HashMap<u64, String>>,
}

impl AliasTable {
    pub fn reset(&mut self, entity: &EntityId) {
        self.aliases.remove(entity);
    }

    /// Oublie les alias du node et de tous ses devices
    pub fn reset_node(&mut self, node: &EntityId) {
        self.aliases.retain(|entity, _| entity.node_of() != *node);
    }

    pub fn learn(&mut self, entity: &EntityId, alias: u64, name: &str) {
        self.aliases
            .entry(entity.clone())
            .or_default()
            .insert(alias, name.to_string());
    }

    pub fn resolve(&self, entity: &EntityId, alias: u64) -> Option<&str> {
        self.aliases.get(entity)?.get(&alias).map(String::as_str)
    }
}

pub struct Ingestor {
    store: Arc<MetricStore>,
    flattener: TemplateFlattener,
    broadcast: BroadcastSender,
    health: HealthTracker,
    aliases: AliasTable,
}

impl Ingestor {
    pub fn new(
        store: Arc<MetricStore>,
        flattener: TemplateFlattener,
        broadcast: BroadcastSender,
        health: HealthTracker,
    ) -> Self {
        Self { store, flattener, broadcast, health, aliases: AliasTable::default() }
    }

    /// Un payload indécodable est rejeté en entier : `Err`, aucun état modifié
    pub fn ingest(&mut self, topic: &SparkplugTopic, payload: &[u8]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let kind = topic.message_type;

        if kind.is_command() {
            debug!(entity = %topic.entity, kind = kind.as_str(), "command message ignored");
            return Ok(report);
        }

        let batch = match decoder::decode(payload) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(entity = %topic.entity, kind = kind.as_str(), error = %e, "batch discarded");
                self.health.record_rejected();
                return Err(e);
            }
        };
        self.health.record_batch();

        for skipped in &batch.skipped {
            warn!(entity = %topic.entity, error = %skipped, "metric skipped");
        }
        report.skipped = batch.skipped.len();

        if kind.is_death() {
            // Le payload de mort ne porte que bdSeq : rien à mettre en cache
            debug!(entity = %topic.entity, "death payload not stored");
            return Ok(report);
        }

        if kind.is_birth() {
            // les devices doivent se réannoncer après un NBIRTH
            if kind == MessageType::NBirth {
                self.aliases.reset_node(&topic.entity);
            } else {
                self.aliases.reset(&topic.entity);
            }
            for record in &batch.records {
                if let (Some(alias), false) = (record.alias, record.name.is_empty()) {
                    self.aliases.learn(&topic.entity, alias, &record.name);
                }
            }
        }

        for record in batch.records {
            let Some(name) = self.resolve_name(&topic.entity, &record) else {
                report.skipped += 1;
                continue;
            };
            self.apply(&name, record, &mut report);
        }

        debug!(
            entity = %topic.entity,
            kind = kind.as_str(),
            stored = report.stored,
            broadcast = report.broadcast,
            skipped = report.skipped,
            "batch ingested"
        );
        Ok(report)
    }

    fn resolve_name(&self, entity: &EntityId, record: &MetricRecord) -> Option<String> {
        if !record.name.is_empty() {
            return Some(record.name.clone());
        }
        let alias = record.alias?;
        match self.aliases.resolve(entity, alias) {
            Some(name) => Some(name.to_string()),
            None => {
                let err = BridgeError::UnknownAlias { entity: entity.to_string(), alias };
                warn!(error = %err, "metric skipped");
                None
            }
        }
    }

    fn apply(&self, name: &str, record: MetricRecord, report: &mut IngestReport) {
        let record = record.with_name(name);

        if matches!(record.value, MetricValue::Template(_)) {
            // Template : stocké sous son nom, seuls les membres autorisés sont diffusés
            let flattened = self.flattener.flatten(name, &record);
            if self.store.put(name, record) {
                report.stored += 1;
            }
            for (qualified, inner) in flattened {
                self.store_and_offer(&qualified, inner, report);
            }
            return;
        }

        self.store_and_offer(name, record, report);
    }

    fn store_and_offer(&self, name: &str, record: MetricRecord, report: &mut IngestReport) {
        let line = render_line(name, &record);
        if !self.store.put(name, record) {
            debug!(metric = name, "older update rejected by store policy");
            return;
        }
        report.stored += 1;
        if self.broadcast.offer(BroadcastMessage::new(line)) {
            report.broadcast += 1;
        }
    }
}

pub struct Bridge<P: CommandPublisher> {
    session: Arc<SessionController<P>>,
    ingestor: Ingestor,
    health: HealthTracker,
}

impl<P: CommandPublisher> Bridge<P> {
    pub fn new(session: Arc<SessionController<P>>, ingestor: Ingestor, health: HealthTracker) -> Self {
        Self { session, ingestor, health }
    }

    pub async fn handle_event(&mut self, event: TransportEvent) -> Option<IngestReport> {
        match event {
            TransportEvent::Connected => {
                info!("MQTT session established");
                self.health.mark_mqtt_connected();
                self.session.on_connected().await;
                None
            }
            TransportEvent::Message { topic, payload } => {
                let Some(parsed) = SparkplugTopic::parse(&topic) else {
                    debug!(topic = %topic, "non Sparkplug topic ignored");
                    return None;
                };
                match self.ingestor.ingest(&parsed, &payload) {
                    Ok(report) => {
                        // le cycle de vie n'avance que sur un payload décodé
                        self.session.observe(&parsed);
                        Some(report)
                    }
                    Err(_) => Some(IngestReport::default()),
                }
            }
            TransportEvent::Disconnected { reason } => {
                warn!(reason = %reason, "MQTT session lost");
                self.health.mark_mqtt_disconnected();
                self.session.on_disconnected();
                None
            }
        }
    }

    /// Boucle principale ; se termine quand l'adaptateur transport s'arrête
    pub async fn run(mut self, mut events: mpsc::Receiver<TransportEvent>) {
        info!("ingestion loop started");
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("ingestion loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub;
    use crate::sparkplug::{datatype, encode, metric, Metric, Payload, Template};

    fn ingestor(allow: &[&str], capacity: usize) -> (Ingestor, Arc<MetricStore>, hub::BroadcastHub) {
        let store = Arc::new(MetricStore::default());
        let (sender, hub) = hub::channel(capacity);
        let ingestor = Ingestor::new(
            Arc::clone(&store),
            TemplateFlattener::new(allow.iter().copied()),
            sender,
            HealthTracker::new(),
        );
        (ingestor, store, hub)
    }

    fn topic(s: &str) -> SparkplugTopic {
        SparkplugTopic::parse(s).unwrap()
    }

    fn double(name: &str, alias: Option<u64>, v: f64) -> Metric {
        Metric {
            name: if name.is_empty() { None } else { Some(name.into()) },
            alias,
            datatype: Some(datatype::DOUBLE),
            value: Some(metric::Value::DoubleValue(v)),
            ..Default::default()
        }
    }

    fn payload(metrics: Vec<Metric>) -> Vec<u8> {
        encode(&Payload { metrics, ..Default::default() })
    }

    #[test]
    fn test_data_is_stored_and_broadcast() {
        let (mut ingestor, store, _hub) = ingestor(&[], 16);
        let report = ingestor.ingest(
            &topic("spBv1.0/Plant/NDATA/Edge1"),
            &payload(vec![double("Speed", None, 12.5), double("Temp", None, 20.0)]),
        )
        .unwrap();
        assert_eq!(report, IngestReport { stored: 2, broadcast: 2, skipped: 0 });
        assert_eq!(store.get("Speed").unwrap().value, MetricValue::Double(12.5));
    }

    #[test]
    fn test_malformed_batch_leaves_store_untouched() {
        let (mut ingestor, store, _hub) = ingestor(&[], 16);
        let err = ingestor.ingest(&topic("spBv1.0/Plant/NDATA/Edge1"), &[0x0a, 0xff, 0x01]).unwrap_err();
        assert!(matches!(err, BridgeError::Decode(_)));
        assert!(store.is_empty());
        assert_eq!(ingestor.health.batches_rejected(), 1);
    }

    #[test]
    fn test_alias_resolution_from_birth() {
        let (mut ingestor, store, _hub) = ingestor(&[], 16);
        ingestor.ingest(&topic("spBv1.0/Plant/DBIRTH/Edge1/1234"), &payload(vec![double("Speed", Some(7), 1.0)])).unwrap();

        let report = ingestor.ingest(&topic("spBv1.0/Plant/DDATA/Edge1/1234"), &payload(vec![double("", Some(7), 2.0)])).unwrap();
        assert_eq!(report.stored, 1);
        assert_eq!(store.get("Speed").unwrap().value, MetricValue::Double(2.0));

        // alias inconnu pour un autre device
        let report = ingestor.ingest(&topic("spBv1.0/Plant/DDATA/Edge1/9999"), &payload(vec![double("", Some(7), 3.0)])).unwrap();
        assert_eq!(report, IngestReport { stored: 0, broadcast: 0, skipped: 1 });
    }

    #[test]
    fn test_template_is_stored_and_allow_listed_members_broadcast() {
        let (mut ingestor, store, _hub) = ingestor(&["oee"], 16);
        let line = Metric {
            name: Some("Line 1".into()),
            datatype: Some(datatype::TEMPLATE),
            value: Some(metric::Value::TemplateValue(Template {
                metrics: vec![double("oee", None, 0.8), double("oeeQuality", None, 0.9)],
                ..Default::default()
            })),
            ..Default::default()
        };

        let report = ingestor.ingest(&topic("spBv1.0/Plant/NDATA/Edge1"), &payload(vec![line])).unwrap();
        assert_eq!(report, IngestReport { stored: 2, broadcast: 1, skipped: 0 });
        assert!(store.get("Line 1").is_some());
        assert_eq!(store.get("Line 1/oee").unwrap().value, MetricValue::Double(0.8));
        assert!(store.get("Line 1/oeeQuality").is_none());
    }

    #[test]
    fn test_commands_and_deaths_are_not_stored() {
        let (mut ingestor, store, _hub) = ingestor(&[], 16);
        let bytes = payload(vec![double("bdSeq", None, 1.0)]);
        assert_eq!(ingestor.ingest(&topic("spBv1.0/Plant/NCMD/Edge1"), &bytes).unwrap(), IngestReport::default());
        assert_eq!(ingestor.ingest(&topic("spBv1.0/Plant/NDEATH/Edge1"), &bytes).unwrap(), IngestReport::default());
        assert!(store.is_empty());
    }

    #[test]
    fn test_saturated_queue_does_not_block_ingestion() {
        let (mut ingestor, store, _hub) = ingestor(&[], 1);
        let report = ingestor.ingest(
            &topic("spBv1.0/Plant/NDATA/Edge1"),
            &payload(vec![double("a", None, 1.0), double("b", None, 2.0), double("c", None, 3.0)]),
        )
        .unwrap();
        assert_eq!(report.stored, 3);
        assert_eq!(report.broadcast, 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_node_birth_forgets_device_aliases() {
        let (mut ingestor, store, _hub) = ingestor(&[], 16);
        let dbirth = payload(vec![double("Speed", Some(7), 1.0)]);
        ingestor.ingest(&topic("spBv1.0/Plant/DBIRTH/Edge1/1234"), &dbirth).unwrap();
        ingestor.ingest(&topic("spBv1.0/Plant/DBIRTH/Edge2/1234"), &dbirth).unwrap();
        ingestor.ingest(&topic("spBv1.0/Plant/NBIRTH/Edge1"), &payload(vec![double("bdSeq", None, 0.0)])).unwrap();

        let report = ingestor.ingest(&topic("spBv1.0/Plant/DDATA/Edge1/1234"), &payload(vec![double("", Some(7), 2.0)])).unwrap();
        assert_eq!(report, IngestReport { stored: 0, broadcast: 0, skipped: 1 });
        assert_eq!(store.get("Speed").unwrap().value, MetricValue::Double(1.0));

        // un autre node garde ses alias
        let report = ingestor.ingest(&topic("spBv1.0/Plant/DDATA/Edge2/1234"), &payload(vec![double("", Some(7), 3.0)])).unwrap();
        assert_eq!(report.stored, 1);
    }

    #[tokio::test]
    async fn test_undecodable_birth_keeps_lifecycle_and_aliases() {
        use crate::session::{LifecycleState, SessionSettings};

        struct SilentPublisher;

        impl CommandPublisher for SilentPublisher {
            async fn subscribe(&self, _topic: &str) -> Result<()> {
                Ok(())
            }

            async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<()> {
                Ok(())
            }
        }

        let (ingestor, store, _hub) = ingestor(&[], 16);
        let settings = SessionSettings {
            namespace: "spBv1.0".into(),
            group_id: "Plant".into(),
            edge_node_id: "Edge1".into(),
            rebirth_device: None,
            subscribe_topic: "spBv1.0/Plant/#".into(),
            settle_delay: std::time::Duration::from_secs(60),
            device_delay: std::time::Duration::ZERO,
        };
        let session = Arc::new(SessionController::new(Arc::new(SilentPublisher), settings));
        let lifecycle = session.lifecycle();
        let mut bridge = Bridge::new(Arc::clone(&session), ingestor, HealthTracker::new());
        let node = EntityId::node("Plant", "Edge1");

        bridge.handle_event(TransportEvent::Connected).await;
        let birth = payload(vec![double("Speed", Some(7), 1.0)]);
        bridge
            .handle_event(TransportEvent::Message { topic: "spBv1.0/Plant/NBIRTH/Edge1".into(), payload: birth.into() })
            .await;
        lifecycle.lock().set(node.clone(), LifecycleState::BirthPending);

        let report = bridge
            .handle_event(TransportEvent::Message {
                topic: "spBv1.0/Plant/NBIRTH/Edge1".into(),
                payload: Bytes::from_static(&[0xff, 0xff, 0xff]),
            })
            .await;
        assert_eq!(report, Some(IngestReport::default()));
        assert_eq!(lifecycle.lock().get(&node), LifecycleState::BirthPending);

        // la table d'alias apprise au birth précédent reste valide
        let data = payload(vec![double("", Some(7), 4.0)]);
        bridge
            .handle_event(TransportEvent::Message { topic: "spBv1.0/Plant/NDATA/Edge1".into(), payload: data.into() })
            .await;
        assert_eq!(store.get("Speed").unwrap().value, MetricValue::Double(4.0));
        session.on_disconnected();
    }
}
