/**
 * METRIC STORE - Cache "dernière valeur" partagé
 *
 * RÔLE :
 * Table nom complet → dernier MetricRecord accepté. Écrit par l'ingestion,
 * lu par l'API REST et par le rattrapage des nouveaux abonnés WebSocket.
 *
 * CONCURRENCE :
 * RwLock parking_lot : chaque `put` est atomique vis-à-vis des lecteurs,
 * jamais de lecture d'un enregistrement à moitié écrit. Aucun verrou n'est
 * tenu au-delà d'un appel.
 *
 * POLITIQUE :
 * Par défaut dernier arrivé gagnant (ordre de réception). La politique
 * `NewestTimestamp` refuse un enregistrement strictement plus ancien que
 * celui en cache.
 */

use crate::models::MetricRecord;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdatePolicy {
    #[default]
    LastArrival,
    NewestTimestamp,
}

impl std::str::FromStr for UpdatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "last-arrival" => Ok(Self::LastArrival),
            "newest-timestamp" => Ok(Self::NewestTimestamp),
            other => Err(format!("unknown store policy '{other}'")),
        }
    }
}

#[derive(Debug, Default)]
pub struct MetricStore {
    metrics: RwLock<BTreeMap<String, MetricRecord>>,
    policy: UpdatePolicy,
}

impl MetricStore {
    pub fn new(policy: UpdatePolicy) -> Self {
        Self {
            metrics: RwLock::new(BTreeMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> UpdatePolicy {
        self.policy
    }

    /// Écrit l'enregistrement ; retourne false s'il a été refusé par la politique
    pub fn put(&self, name: &str, record: MetricRecord) -> bool {
        let mut metrics = self.metrics.write();
        if self.policy == UpdatePolicy::NewestTimestamp {
            if let (Some(current), Some(incoming)) = (
                metrics.get(name).and_then(|r| r.timestamp_millis),
                record.timestamp_millis,
            ) {
                if incoming < current {
                    return false;
                }
            }
        }
        metrics.insert(name.to_string(), record);
        true
    }

    pub fn get(&self, name: &str) -> Option<MetricRecord> {
        self.metrics.read().get(name).cloned()
    }

    /// Copie triée par nom, utilisée pour le rattrapage des abonnés
    pub fn snapshot(&self) -> Vec<(String, MetricRecord)> {
        self.metrics
            .read()
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.metrics.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricValue;
    use std::sync::Arc;

    fn record(value: f64, ts: Option<u64>) -> MetricRecord {
        MetricRecord {
            name: "Speed".into(),
            alias: None,
            datatype: None,
            value: MetricValue::Double(value),
            timestamp_millis: ts,
        }
    }

    #[test]
    fn test_last_write_wins_by_arrival() {
        let store = MetricStore::new(UpdatePolicy::LastArrival);
        assert!(store.put("Speed", record(1.0, Some(200))));
        // Horodatage plus ancien mais arrivé après : il gagne quand même
        assert!(store.put("Speed", record(2.0, Some(100))));
        assert_eq!(store.get("Speed").unwrap().value, MetricValue::Double(2.0));
    }

    #[test]
    fn test_newest_timestamp_policy_rejects_older() {
        let store = MetricStore::new(UpdatePolicy::NewestTimestamp);
        assert!(store.put("Speed", record(1.0, Some(200))));
        assert!(!store.put("Speed", record(2.0, Some(100))));
        assert_eq!(store.get("Speed").unwrap().value, MetricValue::Double(1.0));

        assert!(store.put("Speed", record(3.0, Some(200))));
        assert!(store.put("Speed", record(4.0, None)));
        assert_eq!(store.get("Speed").unwrap().value, MetricValue::Double(4.0));
    }

    #[test]
    fn test_snapshot_and_names_are_ordered() {
        let store = MetricStore::default();
        store.put("b", record(2.0, None));
        store.put("a", record(1.0, None));
        store.put("c/inner", record(3.0, None));

        assert_eq!(store.names(), vec!["a", "b", "c/inner"]);
        let snapshot: Vec<String> = store.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(snapshot, vec!["a", "b", "c/inner"]);
        assert_eq!(store.len(), 3);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("last-arrival".parse::<UpdatePolicy>(), Ok(UpdatePolicy::LastArrival));
        assert_eq!("newest-timestamp".parse::<UpdatePolicy>(), Ok(UpdatePolicy::NewestTimestamp));
        assert!("oldest".parse::<UpdatePolicy>().is_err());
    }

    #[test]
    fn test_concurrent_readers_see_whole_records() {
        let store = Arc::new(MetricStore::default());
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..1000u64 {
                    store.put("Speed", record(i as f64, Some(i)));
                }
            })
        };

        for _ in 0..1000 {
            if let Some(r) = store.get("Speed") {
                // valeur et horodatage écrits ensemble
                assert_eq!(r.value, MetricValue::Double(r.timestamp_millis.unwrap() as f64));
            }
        }
        writer.join().unwrap();
        assert_eq!(store.get("Speed").unwrap().value, MetricValue::Double(999.0));
    }
}
