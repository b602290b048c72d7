/**
 * ERREURS DU BRIDGE - Taxonomie des échecs du pipeline
 *
 * Chaque variante a une frontière d'échec précise : un batch, une métrique,
 * une commande sortante ou un abonné. Aucune ne doit arrêter le process
 * une fois le démarrage terminé.
 */

use crate::subscribers::SubscriberId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Batch protobuf illisible : le batch entier est jeté
    #[error("malformed Sparkplug payload: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Métrique sans variante de valeur : seule cette métrique est ignorée
    #[error("metric {name:?} has no value set")]
    MissingValueVariant { name: String },

    #[error("metric without name nor alias")]
    UnnamedMetric,

    #[error("alias {alias} is unknown for {entity}")]
    UnknownAlias { entity: String, alias: u64 },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("MQTT connection failed: {0}")]
    Connect(String),

    #[error("send to subscriber {0} failed")]
    SubscriberSend(SubscriberId),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
