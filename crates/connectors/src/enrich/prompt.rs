use serde_json::{Map, Value as JsonValue};
use std::path::Path;

/// Static instructions shared by every row of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    instructions: String,
}

impl PromptTemplate {
    pub fn new(instructions: impl Into<String>) -> Self {
        PromptTemplate {
            instructions: instructions.into(),
        }
    }

    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        Ok(Self::new(std::fs::read_to_string(path)?))
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Hex blake3 digest of the instructions. Identical instructions always
    /// share a key, so the service can reuse the cached prefix across rows.
    pub fn cache_key(&self) -> String {
        blake3::hash(self.instructions.as_bytes()).to_hex().to_string()
    }

    /// Per-row user message. Kept small: only the row payload as JSON.
    pub fn render_row(&self, payload: &Map<String, JsonValue>) -> String {
        let body = JsonValue::Object(payload.clone());
        format!("Row data:\n{body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_key_depends_only_on_instructions() {
        let a = PromptTemplate::new("Classify the case.");
        let b = PromptTemplate::new("Classify the case.");
        let c = PromptTemplate::new("Summarise the case.");
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
        assert_eq!(a.cache_key().len(), 64);
    }

    #[test]
    fn renders_payload_as_json() {
        let mut payload = Map::new();
        payload.insert("title".into(), json!("Fever"));
        let msg = PromptTemplate::new("x").render_row(&payload);
        assert!(msg.ends_with(r#"{"title":"Fever"}"#));
    }
}
