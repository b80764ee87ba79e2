use crate::error::EnrichError;
use async_trait::async_trait;
use model::core::identifiers::RowId;
use serde_json::{Map, Value as JsonValue};

pub mod openai;
pub mod prompt;

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichRequest {
    pub row_id: RowId,
    /// Non-blank cells of the input row, keyed by header name.
    pub payload: Map<String, JsonValue>,
    /// Stable key for the static part of the prompt, when caching is enabled.
    pub cache_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnrichResponse {
    pub fields: Map<String, JsonValue>,
    /// The service reported reuse of a cached prompt prefix.
    pub cache_hit: bool,
}

/// Black-box transformation applied to each row.
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    async fn enrich(&self, request: EnrichRequest) -> Result<EnrichResponse, EnrichError>;

    /// Cache key the step engine attaches to every request of a run.
    fn cache_key(&self) -> Option<String> {
        None
    }
}
