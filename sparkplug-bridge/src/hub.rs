/**
 * BROADCAST HUB - Découplage ingestion / diffusion
 *
 * FONCTIONNEMENT :
 * - File FIFO bornée multi-producteurs / consommateur unique (tokio mpsc)
 * - Côté ingestion : `offer` non bloquant, message jeté et compté si la file est pleine
 * - Côté serveur : une seule tâche vide la file et diffuse via le registre,
 *   dans l'ordre d'arrivée
 *
 * C'est le seul point de passage entre le contexte d'ingestion et le
 * contexte de service HTTP/WebSocket.
 */

use crate::subscribers::SubscriberRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    pub text: String,
}

impl BroadcastMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Côté producteur, cloné dans l'ingestion
#[derive(Clone)]
pub struct BroadcastSender {
    tx: mpsc::Sender<BroadcastMessage>,
    dropped: Arc<AtomicU64>,
}

impl BroadcastSender {
    /// Enfile sans jamais attendre ; false si le message a été jeté
    pub fn offer(&self, message: BroadcastMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped_total = total, text = %message.text, "broadcast queue full, dropping update");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("broadcast hub stopped, dropping update");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Côté consommateur unique
pub struct BroadcastHub {
    rx: mpsc::Receiver<BroadcastMessage>,
}

pub fn channel(capacity: usize) -> (BroadcastSender, BroadcastHub) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        BroadcastSender { tx, dropped: Arc::new(AtomicU64::new(0)) },
        BroadcastHub { rx },
    )
}

impl BroadcastHub {
    /// Vide la file jusqu'à fermeture de tous les producteurs
    pub async fn run(mut self, registry: Arc<SubscriberRegistry>) {
        info!("broadcast hub started");
        while let Some(message) = self.rx.recv().await {
            let report = registry.fan_out(&message);
            debug!(delivered = report.delivered, removed = report.removed, "broadcast delivered");
        }
        info!("broadcast hub stopped");
    }

    pub fn spawn(self, registry: Arc<SubscriberRegistry>) -> JoinHandle<()> {
        tokio::spawn(self.run(registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MetricStore;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_offer_drops_when_full() {
        let (sender, _hub) = channel(2);
        assert!(sender.offer(BroadcastMessage::new("a")));
        assert!(sender.offer(BroadcastMessage::new("b")));
        assert!(!sender.offer(BroadcastMessage::new("c")));
        assert_eq!(sender.dropped(), 1);
    }

    #[test]
    fn test_offer_after_hub_stopped() {
        let (sender, hub) = channel(2);
        drop(hub);
        assert!(!sender.offer(BroadcastMessage::new("a")));
        assert_eq!(sender.dropped(), 1);
    }

    #[tokio::test]
    async fn test_hub_delivers_in_fifo_order() {
        let store = MetricStore::default();
        let registry = Arc::new(SubscriberRegistry::new(16));
        let (_handle, mut rx) = registry.join(&store);

        let (sender, hub) = channel(16);
        for i in 0..5 {
            assert!(sender.offer(BroadcastMessage::new(format!("m{i}"))));
        }
        let task = hub.spawn(Arc::clone(&registry));

        for i in 0..5 {
            let line = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
            assert_eq!(line, format!("m{i}"));
        }

        drop(sender);
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
