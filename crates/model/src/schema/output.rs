use serde::{Deserialize, Serialize};

/// One field the enrichment call is expected to return.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputField {
    pub name: String,

    /// Output sheet column the field is written to. Defaults to `name`.
    #[serde(default)]
    pub column: Option<String>,

    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl OutputField {
    pub fn new(name: &str, required: bool) -> Self {
        OutputField {
            name: name.to_string(),
            column: None,
            required,
        }
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    pub fn column(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

/// Shape of a valid enrichment result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OutputSchema {
    pub fields: Vec<OutputField>,

    /// When false, fields outside the schema make a response malformed.
    #[serde(default)]
    pub allow_extra_fields: bool,
}

impl OutputSchema {
    pub fn new(fields: Vec<OutputField>) -> Self {
        OutputSchema {
            fields,
            allow_extra_fields: false,
        }
    }

    pub fn field(&self, name: &str) -> Option<&OutputField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required(&self) -> impl Iterator<Item = &OutputField> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.column())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_defaults_to_name() {
        let f = OutputField::new("category", true);
        assert_eq!(f.column(), "category");
        assert_eq!(f.with_column("Category").column(), "Category");
    }

    #[test]
    fn deserializes_with_defaults() {
        let schema: OutputSchema =
            serde_json::from_str(r#"{"fields":[{"name":"category"},{"name":"notes","required":false}]}"#)
                .unwrap();
        assert_eq!(schema.required().count(), 1);
        assert!(!schema.allow_extra_fields);
    }
}
