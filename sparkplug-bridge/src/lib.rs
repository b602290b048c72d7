//! Sparkplug Bridge - pont Sparkplug B (MQTT) → navigateurs
//!
//! Pipeline : transport MQTT → décodeur → store (+ flattener) → hub → abonnés WebSocket.
//! Le contrôleur de session force un rebirth à chaque (re)connexion.

pub mod bridge;
pub mod config;
pub mod decoder;
pub mod error;
pub mod flatten;
pub mod health;
pub mod http;
pub mod hub;
pub mod models;
pub mod mqtt;
pub mod session;
pub mod sparkplug;
pub mod state;
pub mod store;
pub mod subscribers;
pub mod topic;

pub use bridge::{Bridge, Ingestor, IngestReport, TransportEvent};
pub use error::BridgeError;
pub use models::{MetricRecord, MetricValue, ValueKind};
pub use session::{CommandPublisher, SessionController, SessionSettings};
pub use store::{MetricStore, UpdatePolicy};
pub use subscribers::SubscriberRegistry;
