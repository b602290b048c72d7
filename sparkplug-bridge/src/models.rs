use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Nature d'une valeur décodée, fixée une fois pour toutes au décodage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Int,
    UInt,
    Float,
    Double,
    String,
    Bytes,
    DateTime,
    Template,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Millisecondes epoch
    DateTime(u64),
    /// Métriques internes d'un template (un seul niveau aplati ensuite)
    Template(Vec<MetricRecord>),
}

impl MetricValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            MetricValue::Bool(_) => ValueKind::Bool,
            MetricValue::Int(_) => ValueKind::Int,
            MetricValue::UInt(_) => ValueKind::UInt,
            MetricValue::Float(_) => ValueKind::Float,
            MetricValue::Double(_) => ValueKind::Double,
            MetricValue::String(_) => ValueKind::String,
            MetricValue::Bytes(_) => ValueKind::Bytes,
            MetricValue::DateTime(_) => ValueKind::DateTime,
            MetricValue::Template(_) => ValueKind::Template,
        }
    }

    /// Représentation JSON pour l'API REST
    pub fn to_json(&self) -> Value {
        match self {
            MetricValue::Bool(b) => Value::Bool(*b),
            MetricValue::Int(i) => Value::from(*i),
            MetricValue::UInt(u) | MetricValue::DateTime(u) => Value::from(*u),
            MetricValue::Float(f) => Value::from(*f as f64),
            MetricValue::Double(d) => Value::from(*d),
            MetricValue::String(s) => Value::String(s.clone()),
            MetricValue::Bytes(b) => Value::from(b.clone()),
            MetricValue::Template(inner) => {
                let mut map = Map::new();
                for record in inner {
                    map.insert(record.name.clone(), record.value.to_json());
                }
                Value::Object(map)
            }
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Bool(b) => write!(f, "{b}"),
            MetricValue::Int(i) => write!(f, "{i}"),
            MetricValue::UInt(u) | MetricValue::DateTime(u) => write!(f, "{u}"),
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::Double(v) => write!(f, "{v}"),
            MetricValue::String(s) => f.write_str(s),
            MetricValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            MetricValue::Template(inner) => write!(f, "<template: {} metrics>", inner.len()),
        }
    }
}

/// Une métrique décodée, immuable une fois produite par le décodeur
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    /// Vide si la métrique n'a été publiée qu'avec un alias
    pub name: String,
    pub alias: Option<u64>,
    pub datatype: Option<u32>,
    pub value: MetricValue,
    pub timestamp_millis: Option<u64>,
}

impl MetricRecord {
    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Ligne poussée aux abonnés WebSocket : `{name} = {value}`
pub fn render_line(name: &str, record: &MetricRecord) -> String {
    format!("{name} = {}", record.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: MetricValue) -> MetricRecord {
        MetricRecord { name: "x".into(), alias: None, datatype: None, value, timestamp_millis: None }
    }

    #[test]
    fn test_render_line() {
        assert_eq!(render_line("Motor/Running", &record(MetricValue::Bool(true))), "Motor/Running = true");
        assert_eq!(render_line("Speed", &record(MetricValue::Double(12.5))), "Speed = 12.5");
        assert_eq!(render_line("Label", &record(MetricValue::String("ok".into()))), "Label = ok");
        assert_eq!(render_line("Blob", &record(MetricValue::Bytes(vec![1, 2, 3]))), "Blob = <3 bytes>");
    }

    #[test]
    fn test_template_json_is_object() {
        let inner = vec![
            record(MetricValue::Double(0.9)).with_name("oee"),
            record(MetricValue::Int(-3)).with_name("rejects"),
        ];
        let json = MetricValue::Template(inner).to_json();
        assert_eq!(json["oee"], 0.9);
        assert_eq!(json["rejects"], -3);
    }
}
