use crate::core::value::FieldValue;
use serde::{Deserialize, Serialize};

/// One data row read from a sheet, with cells named after the header row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowData {
    /// 1-based row index in the sheet.
    pub index: usize,
    pub fields: Vec<FieldValue>,
}

impl RowData {
    pub fn new(index: usize, fields: Vec<FieldValue>) -> Self {
        RowData { index, fields }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(field))
    }

    /// Trimmed text of a field, `None` when the field is absent or blank.
    pub fn get_text(&self, field: &str) -> Option<String> {
        self.get(field).and_then(|f| f.value.as_text())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.iter().all(|f| f.value.is_blank())
    }

    /// JSON object handed to the enrichment call. Unnamed columns are dropped.
    pub fn to_payload(&self) -> serde_json::Map<String, serde_json::Value> {
        self.fields
            .iter()
            .filter(|f| !f.name.is_empty() && !f.value.is_blank())
            .map(|f| (f.name.clone(), f.value.to_json()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;

    fn row() -> RowData {
        RowData::new(
            3,
            vec![
                FieldValue {
                    name: "Case_ID".into(),
                    value: Value::String(" C-1 ".into()),
                },
                FieldValue {
                    name: "Title".into(),
                    value: Value::String("Chest pain".into()),
                },
                FieldValue {
                    name: "Notes".into(),
                    value: Value::Null,
                },
                FieldValue {
                    name: String::new(),
                    value: Value::String("orphan".into()),
                },
            ],
        )
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let r = row();
        assert_eq!(r.get_text("case_id"), Some("C-1".into()));
        assert!(r.get("missing").is_none());
        assert_eq!(r.get_text("Notes"), None);
    }

    #[test]
    fn payload_skips_blank_and_unnamed_cells() {
        let payload = row().to_payload();
        assert_eq!(payload.len(), 2);
        assert!(payload.contains_key("Title"));
        assert!(!payload.contains_key("Notes"));
    }
}
