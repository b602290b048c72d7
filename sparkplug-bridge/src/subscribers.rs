/**
 * SUBSCRIBER REGISTRY - Abonnés WebSocket actifs
 *
 * RÔLE :
 * Chaque abonné possède une file bornée (mpsc) vidée par sa tâche
 * d'écriture WebSocket. Le registre ne fait que des `try_send` : un abonné
 * lent ou déconnecté ne bloque jamais les autres.
 *
 * CYCLE DE VIE :
 * - join : rattrapage (snapshot du store) mis en file AVANT l'insertion
 * - leave : déconnexion explicite
 * - remove_on_failure : premier échec d'envoi, idempotent
 */

use crate::error::BridgeError;
use crate::hub::BroadcastMessage;
use crate::models::render_line;
use crate::store::MetricStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0.simple())
    }
}

/// Poignée rendue à la session WebSocket
#[derive(Debug)]
pub struct SubscriberHandle {
    pub id: SubscriberId,
    /// Nombre de lignes de rattrapage mises en file au join
    pub catch_up: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub removed: usize,
}

pub struct SubscriberRegistry {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<String>>>,
    queue_capacity: usize,
}

impl SubscriberRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Enregistre un abonné et lui pousse l'état courant du store
    pub fn join(&self, store: &MetricStore) -> (SubscriberHandle, mpsc::Receiver<String>) {
        let id = SubscriberId::new();

        // Le verrou couvre snapshot + insertion : tout fan-out ultérieur passe derrière
        let mut subscribers = self.subscribers.lock();
        let snapshot = store.snapshot();
        let (tx, rx) = mpsc::channel(self.queue_capacity + snapshot.len());
        for (name, record) in &snapshot {
            // capacité dimensionnée pour le snapshot, ne peut pas échouer
            let _ = tx.try_send(render_line(name, record));
        }
        subscribers.insert(id, tx);
        let count = subscribers.len();
        drop(subscribers);

        info!(subscriber = %id, catch_up = snapshot.len(), active = count, "subscriber joined");
        (SubscriberHandle { id, catch_up: snapshot.len() }, rx)
    }

    pub fn leave(&self, handle: &SubscriberHandle) {
        if self.subscribers.lock().remove(&handle.id).is_some() {
            info!(subscriber = %handle.id, "subscriber left");
        }
    }

    /// Retire un abonné après un échec d'envoi ; sans effet s'il est déjà parti
    pub fn remove_on_failure(&self, id: &SubscriberId) -> bool {
        let removed = self.subscribers.lock().remove(id).is_some();
        if removed {
            warn!(subscriber = %id, "subscriber removed after send failure");
        }
        removed
    }

    /// Diffuse un message à tous les abonnés présents au début de l'appel
    pub fn fan_out(&self, message: &BroadcastMessage) -> FanOutReport {
        let targets: Vec<(SubscriberId, mpsc::Sender<String>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut report = FanOutReport::default();
        for (id, tx) in targets {
            match tx.try_send(message.text.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    let err = BridgeError::SubscriberSend(id);
                    debug!(error = %err, cause = %e, "fan-out failed");
                    if self.remove_on_failure(&id) {
                        report.removed += 1;
                    }
                }
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.subscribers.lock().contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricRecord, MetricValue};

    fn msg(text: &str) -> BroadcastMessage {
        BroadcastMessage { text: text.into() }
    }

    fn put(store: &MetricStore, name: &str, value: bool) {
        store.put(
            name,
            MetricRecord { name: name.into(), alias: None, datatype: None, value: MetricValue::Bool(value), timestamp_millis: None },
        );
    }

    #[test]
    fn test_join_and_leave() {
        let store = MetricStore::default();
        let registry = SubscriberRegistry::new(8);
        assert!(registry.is_empty());

        let (a, _rx_a) = registry.join(&store);
        let (b, _rx_b) = registry.join(&store);
        assert_eq!(registry.len(), 2);
        assert_ne!(a.id, b.id);

        registry.leave(&a);
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(&a.id));
        assert!(registry.contains(&b.id));
    }

    #[test]
    fn test_remove_on_failure_is_idempotent() {
        let store = MetricStore::default();
        let registry = SubscriberRegistry::new(8);
        let (a, _rx) = registry.join(&store);

        assert!(registry.remove_on_failure(&a.id));
        assert!(!registry.remove_on_failure(&a.id));
        registry.leave(&a);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_catch_up_precedes_live_messages() {
        let store = MetricStore::default();
        put(&store, "b", false);
        put(&store, "a", true);

        let registry = SubscriberRegistry::new(4);
        let (handle, mut rx) = registry.join(&store);
        assert_eq!(handle.catch_up, 2);

        registry.fan_out(&msg("c = 1"));

        assert_eq!(rx.recv().await.unwrap(), "a = true");
        assert_eq!(rx.recv().await.unwrap(), "b = false");
        assert_eq!(rx.recv().await.unwrap(), "c = 1");
    }

    #[tokio::test]
    async fn test_failed_subscriber_is_isolated() {
        let store = MetricStore::default();
        let registry = SubscriberRegistry::new(4);
        let (_a, mut rx_a) = registry.join(&store);
        let (b, rx_b) = registry.join(&store);
        let (_c, mut rx_c) = registry.join(&store);

        // B ferme sa file : son envoi échoue
        drop(rx_b);

        let report = registry.fan_out(&msg("m1"));
        assert_eq!(report, FanOutReport { delivered: 2, removed: 1 });
        assert!(!registry.contains(&b.id));
        assert_eq!(rx_a.recv().await.unwrap(), "m1");
        assert_eq!(rx_c.recv().await.unwrap(), "m1");

        let report = registry.fan_out(&msg("m2"));
        assert_eq!(report, FanOutReport { delivered: 2, removed: 0 });
        assert_eq!(rx_a.recv().await.unwrap(), "m2");
        assert_eq!(rx_c.recv().await.unwrap(), "m2");
    }

    #[test]
    fn test_full_queue_counts_as_failure() {
        let store = MetricStore::default();
        let registry = SubscriberRegistry::new(1);
        let (slow, _rx) = registry.join(&store);

        assert_eq!(registry.fan_out(&msg("m1")).delivered, 1);
        assert_eq!(registry.fan_out(&msg("m2")).removed, 1);
        assert!(!registry.contains(&slow.id));
    }

    #[test]
    fn test_concurrent_join_leave_and_fan_out() {
        const MESSAGES: usize = 2_000;
        let store = MetricStore::default();
        put(&store, "a", true);
        let registry = SubscriberRegistry::new(MESSAGES);
        let (stable, mut rx) = registry.join(&store);
        assert_eq!(rx.try_recv().unwrap(), "a = true");

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let (handle, churn_rx) = registry.join(&store);
                        assert_eq!(handle.catch_up, 1);
                        registry.leave(&handle);
                        drop(churn_rx);
                    }
                });
            }
            scope.spawn(|| {
                for i in 0..MESSAGES {
                    registry.fan_out(&msg(&format!("m{i}")));
                }
            });
        });

        let received: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let expected: Vec<String> = (0..MESSAGES).map(|i| format!("m{i}")).collect();
        assert_eq!(received, expected);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&stable.id));
    }
}
