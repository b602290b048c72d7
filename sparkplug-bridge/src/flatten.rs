use crate::models::{MetricRecord, MetricValue};
use std::collections::HashSet;

/// Extrait d'un template les métriques internes présentes dans l'allow-list.
/// Nom qualifié : `{outer}/{inner}`. Un seul niveau d'imbrication.
#[derive(Debug, Clone, Default)]
pub struct TemplateFlattener {
    allow_list: HashSet<String>,
}

impl TemplateFlattener {
    pub fn new<I, S>(allow_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow_list: allow_list.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allow_list.is_empty()
    }

    pub fn flatten(&self, outer_name: &str, record: &MetricRecord) -> Vec<(String, MetricRecord)> {
        let MetricValue::Template(inner) = &record.value else {
            return Vec::new();
        };

        inner
            .iter()
            .filter(|m| self.allow_list.contains(&m.name))
            .map(|m| {
                let qualified = format!("{outer_name}/{}", m.name);
                (qualified.clone(), m.clone().with_name(qualified))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, value: f64) -> MetricRecord {
        MetricRecord {
            name: name.into(),
            alias: None,
            datatype: None,
            value: MetricValue::Double(value),
            timestamp_millis: Some(42),
        }
    }

    fn template(name: &str, inner: Vec<MetricRecord>) -> MetricRecord {
        MetricRecord {
            name: name.into(),
            alias: None,
            datatype: None,
            value: MetricValue::Template(inner),
            timestamp_millis: None,
        }
    }

    #[test]
    fn test_only_allow_listed_inner_metrics() {
        let flattener = TemplateFlattener::new(["oee"]);
        let line = template("Line 1", vec![leaf("oee", 0.8), leaf("oeeQuality", 0.95)]);

        let out = flattener.flatten("Line 1", &line);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, "Line 1/oee");
        assert_eq!(out[0].1.value, MetricValue::Double(0.8));
        assert_eq!(out[0].1.timestamp_millis, Some(42));
    }

    #[test]
    fn test_non_template_and_empty_allow_list() {
        let flattener = TemplateFlattener::new(["oee"]);
        assert!(flattener.flatten("Speed", &leaf("Speed", 1.0)).is_empty());

        let none = TemplateFlattener::default();
        assert!(none.is_empty());
        assert!(none.flatten("Line 1", &template("Line 1", vec![leaf("oee", 0.8)])).is_empty());
    }

    #[test]
    fn test_single_level_only() {
        let flattener = TemplateFlattener::new(["oee", "cell"]);
        let nested = template("cell", vec![leaf("oee", 0.5)]);
        let line = template("Line 1", vec![nested]);

        let out = flattener.flatten("Line 1", &line);
        // le template interne est émis tel quel, sans descendre plus bas
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, "Line 1/cell");
        assert!(matches!(out[0].1.value, MetricValue::Template(_)));
    }
}
