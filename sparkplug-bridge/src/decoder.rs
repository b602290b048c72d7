/**
 * DÉCODEUR SPARKPLUG B - Batch protobuf → MetricRecord
 *
 * RÔLE :
 * Transforme un payload brut en séquence ordonnée de MetricRecord.
 * Fonction pure : aucun état partagé, aucun effet de bord.
 *
 * ISOLATION DES ERREURS :
 * - Payload illisible → Err(Decode), le batch entier est rejeté par l'appelant
 * - Métrique sans valeur → ignorée seule, notée dans `skipped`, le batch continue
 */

use crate::error::{BridgeError, Result};
use crate::models::{MetricRecord, MetricValue};
use crate::sparkplug::{datatype, metric, Metric, Payload};
use prost::Message;

#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub timestamp: Option<u64>,
    pub seq: Option<u64>,
    pub records: Vec<MetricRecord>,
    pub skipped: Vec<BridgeError>,
}

pub fn decode(bytes: &[u8]) -> Result<DecodedBatch> {
    let payload = Payload::decode(bytes)?;
    Ok(decode_payload(payload))
}

/// Décode un payload déjà parsé (utile quand on a le message en main)
pub fn decode_payload(payload: Payload) -> DecodedBatch {
    let mut batch = DecodedBatch {
        timestamp: payload.timestamp,
        seq: payload.seq,
        ..Default::default()
    };

    for metric in payload.metrics {
        match decode_metric(metric) {
            Ok(record) => batch.records.push(record),
            Err(e) => batch.skipped.push(e),
        }
    }
    batch
}

fn decode_metric(metric: Metric) -> Result<MetricRecord> {
    let name = metric.name.unwrap_or_default();
    if name.is_empty() && metric.alias.is_none() {
        return Err(BridgeError::UnnamedMetric);
    }
    if metric.is_null == Some(true) {
        return Err(BridgeError::MissingValueVariant { name });
    }
    let Some(raw) = metric.value else {
        return Err(BridgeError::MissingValueVariant { name });
    };

    let value = convert_value(raw, metric.datatype);
    Ok(MetricRecord {
        name,
        alias: metric.alias,
        datatype: metric.datatype,
        value,
        timestamp_millis: metric.timestamp,
    })
}

fn convert_value(raw: metric::Value, dt: Option<u32>) -> MetricValue {
    match raw {
        metric::Value::IntValue(v) => match dt {
            Some(datatype::INT8) => MetricValue::Int(v as u8 as i8 as i64),
            Some(datatype::INT16) => MetricValue::Int(v as u16 as i16 as i64),
            Some(datatype::INT32) => MetricValue::Int(v as i32 as i64),
            _ => MetricValue::UInt(v as u64),
        },
        metric::Value::LongValue(v) => match dt {
            Some(datatype::INT64) => MetricValue::Int(v as i64),
            Some(datatype::DATETIME) => MetricValue::DateTime(v),
            _ => MetricValue::UInt(v),
        },
        metric::Value::FloatValue(v) => MetricValue::Float(v),
        metric::Value::DoubleValue(v) => MetricValue::Double(v),
        metric::Value::BooleanValue(v) => MetricValue::Bool(v),
        metric::Value::StringValue(v) => MetricValue::String(v),
        metric::Value::BytesValue(v) => MetricValue::Bytes(v),
        metric::Value::TemplateValue(template) => {
            // Les métriques internes sans valeur sont ignorées silencieusement
            let inner = template
                .metrics
                .into_iter()
                .filter_map(|m| decode_metric(m).ok())
                .collect();
            MetricValue::Template(inner)
        }
    }
}
