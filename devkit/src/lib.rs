/*!
# Sparkplug DevKit - Stubs et Utilitaires pour tests du bridge

Bibliothèque facilitant les tests bout en bout du bridge avec:
- Stub MQTT implémentant `CommandPublisher` (pas de broker requis)
- Builder de batches Sparkplug B encodés
- Harness câblant le pipeline complet (session, ingestion, hub, abonnés)
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{MockMqttClient, SparkplugPayloadBuilder};
pub use test_utils::TestHarness;
