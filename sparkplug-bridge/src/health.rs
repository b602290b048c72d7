use crate::hub::BroadcastSender;
use crate::store::MetricStore;
use crate::subscribers::SubscriberRegistry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Debug, Serialize, Deserialize)]
pub struct BridgeHealth {
    pub uptime_seconds: u64,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub batches_ingested: u64,
    pub batches_rejected: u64,
    pub last_message_at: Option<String>,
    pub metrics_stored: usize,
    pub subscribers: usize,
    pub broadcasts_dropped: u64,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
    batches_ingested: Arc<AtomicU64>,
    batches_rejected: Arc<AtomicU64>,
    last_message_at: Arc<Mutex<Option<OffsetDateTime>>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
            batches_ingested: Arc::new(AtomicU64::new(0)),
            batches_rejected: Arc::new(AtomicU64::new(0)),
            last_message_at: Arc::new(Mutex::new(None)),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn record_batch(&self) {
        self.batches_ingested.fetch_add(1, Ordering::Relaxed);
        *self.last_message_at.lock() = Some(OffsetDateTime::now_utc());
    }

    pub fn record_rejected(&self) {
        self.batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_status(&self) -> String {
        self.mqtt_status.lock().clone()
    }

    pub fn batches_ingested(&self) -> u64 {
        self.batches_ingested.load(Ordering::Relaxed)
    }

    pub fn batches_rejected(&self) -> u64 {
        self.batches_rejected.load(Ordering::Relaxed)
    }

    pub fn get_health(
        &self,
        store: &MetricStore,
        registry: &SubscriberRegistry,
        broadcast: &BroadcastSender,
    ) -> BridgeHealth {
        let last_message_at = self
            .last_message_at
            .lock()
            .and_then(|t| t.format(&Rfc3339).ok());

        BridgeHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            mqtt_status: self.mqtt_status(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            batches_ingested: self.batches_ingested(),
            batches_rejected: self.batches_rejected(),
            last_message_at,
            metrics_stored: store.len(),
            subscribers: registry.len(),
            broadcasts_dropped: broadcast.dropped(),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    // Inconnu hors Linux
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub;

    #[test]
    fn test_health_counters() {
        let tracker = HealthTracker::new();
        let store = MetricStore::default();
        let registry = SubscriberRegistry::new(4);
        let (sender, _hub) = hub::channel(4);

        tracker.mark_mqtt_connected();
        tracker.record_batch();
        tracker.record_batch();
        tracker.record_rejected();
        tracker.increment_reconnects();

        let health = tracker.get_health(&store, &registry, &sender);
        assert_eq!(health.mqtt_status, "reconnecting");
        assert_eq!(health.mqtt_reconnects, 1);
        assert_eq!(health.batches_ingested, 2);
        assert_eq!(health.batches_rejected, 1);
        assert!(health.last_message_at.is_some());
        assert_eq!(health.metrics_stored, 0);
        assert_eq!(health.subscribers, 0);
    }
}
