use super::{EnrichRequest, EnrichResponse, EnrichmentClient, prompt::PromptTemplate};
use crate::error::EnrichError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub prompt_cache: bool,
}

/// Chat-completions client for OpenAI-compatible services.
pub struct OpenAiClient {
    http: Client,
    config: OpenAiConfig,
    template: PromptTemplate,
    cache_enabled: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig, template: PromptTemplate) -> Result<Self, EnrichError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EnrichError::Rejected {
                status: 0,
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        let cache_enabled = AtomicBool::new(config.prompt_cache);
        Ok(OpenAiClient {
            http,
            config,
            template,
            cache_enabled,
        })
    }

    pub fn caching_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::Relaxed)
    }

    fn url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }

    fn request_body(&self, payload: &Map<String, JsonValue>, cache_key: Option<&str>) -> JsonValue {
        let mut body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": self.template.instructions() },
                { "role": "user", "content": self.template.render_row(payload) },
            ],
            "response_format": { "type": "json_object" },
        });
        if let (Some(key), Some(obj)) = (cache_key, body.as_object_mut()) {
            obj.insert("prompt_cache_key".into(), JsonValue::String(key.to_string()));
        }
        body
    }

    async fn send(&self, body: &JsonValue) -> Result<(StatusCode, Option<Duration>, String), EnrichError> {
        let response = self
            .http
            .post(self.url())
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EnrichError::Transient(format!("request timed out: {e}"))
                } else {
                    EnrichError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response
            .text()
            .await
            .map_err(|e| EnrichError::Transient(format!("failed to read response body: {e}")))?;

        Ok((status, retry_after, text))
    }
}

#[async_trait]
impl EnrichmentClient for OpenAiClient {
    async fn enrich(&self, request: EnrichRequest) -> Result<EnrichResponse, EnrichError> {
        let cache_key = request.cache_key.as_deref().filter(|_| self.caching_enabled());

        let body = self.request_body(&request.payload, cache_key);
        let (mut status, mut retry_after, mut text) = self.send(&body).await?;

        if cache_key.is_some() && rejects_cache_param(status, &text) {
            warn!(
                row = %request.row_id,
                "Service rejected prompt_cache_key, disabling prompt caching for this session"
            );
            self.cache_enabled.store(false, Ordering::Relaxed);
            let body = self.request_body(&request.payload, None);
            (status, retry_after, text) = self.send(&body).await?;
        }

        classify_status(status, retry_after, &text)?;

        let (fields, cached_tokens) = parse_completion(&text)?;
        debug!(row = %request.row_id, fields = fields.len(), cached_tokens, "Enrichment response parsed");
        Ok(EnrichResponse {
            fields,
            cache_hit: cached_tokens > 0,
        })
    }

    fn cache_key(&self) -> Option<String> {
        self.caching_enabled().then(|| self.template.cache_key())
    }
}

fn rejects_cache_param(status: StatusCode, body: &str) -> bool {
    status == StatusCode::BAD_REQUEST && body.contains("prompt_cache_key")
}

fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> Result<(), EnrichError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(EnrichError::RateLimited { retry_after }),
        StatusCode::REQUEST_TIMEOUT => Err(EnrichError::Transient(format!("status {status}"))),
        s if s.is_server_error() => Err(EnrichError::Transient(format!("status {s}: {body}"))),
        s => Err(EnrichError::Rejected {
            status: s.as_u16(),
            message: body.chars().take(500).collect(),
        }),
    }
}

/// Extracts the JSON object returned in the first choice, plus the number of
/// prompt tokens the service served from its cache.
fn parse_completion(text: &str) -> Result<(Map<String, JsonValue>, u64), EnrichError> {
    let completion: ChatCompletion = serde_json::from_str(text)
        .map_err(|e| EnrichError::Malformed(format!("invalid completion body: {e}")))?;

    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| EnrichError::Malformed("completion has no content".into()))?;

    let parsed: JsonValue = serde_json::from_str(strip_code_fences(&content))
        .map_err(|e| EnrichError::Malformed(format!("content is not JSON: {e}")))?;

    let JsonValue::Object(fields) = parsed else {
        return Err(EnrichError::Malformed("content is not a JSON object".into()));
    };

    let cached_tokens = completion
        .usage
        .and_then(|u| u.prompt_tokens_details)
        .map(|d| d.cached_tokens)
        .unwrap_or(0);

    Ok((fields, cached_tokens))
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, if any.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::core::identifiers::RowId;

    fn completion(content: &str, cached: u64) -> String {
        json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }],
            "usage": { "prompt_tokens": 900, "prompt_tokens_details": { "cached_tokens": cached } }
        })
        .to_string()
    }

    fn client(endpoint: &str, prompt_cache: bool) -> OpenAiClient {
        OpenAiClient::new(
            OpenAiConfig {
                endpoint: endpoint.to_string(),
                api_key: "test-key".into(),
                model: "gpt-4o-mini".into(),
                timeout: Duration::from_secs(5),
                prompt_cache,
            },
            PromptTemplate::new("Classify the case. Reply with JSON."),
        )
        .unwrap()
    }

    fn request(client: &OpenAiClient) -> EnrichRequest {
        let mut payload = Map::new();
        payload.insert("title".into(), json!("Chest pain"));
        EnrichRequest {
            row_id: RowId::Primary("C-1".into()),
            payload,
            cache_key: client.cache_key(),
        }
    }

    #[test]
    fn parses_fenced_content() {
        let body = completion("```json\n{\"category\": \"cardio\"}\n```", 0);
        let (fields, cached) = parse_completion(&body).unwrap();
        assert_eq!(fields["category"], json!("cardio"));
        assert_eq!(cached, 0);
    }

    #[test]
    fn non_object_content_is_malformed() {
        let body = completion("[1, 2]", 0);
        assert!(matches!(
            parse_completion(&body).unwrap_err(),
            EnrichError::Malformed(_)
        ));
        assert!(matches!(
            parse_completion("not json").unwrap_err(),
            EnrichError::Malformed(_)
        ));
    }

    #[test]
    fn status_classification() {
        let secs = Some(Duration::from_secs(7));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, secs, ""),
            Err(EnrichError::RateLimited { retry_after: secs })
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, "upstream"),
            Err(EnrichError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, "bad key"),
            Err(EnrichError::Rejected { status: 401, .. })
        ));
        assert!(classify_status(StatusCode::OK, None, "").is_ok());
    }

    #[test]
    fn cache_rejection_detection() {
        assert!(rejects_cache_param(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Unrecognized request argument supplied: prompt_cache_key"}}"#
        ));
        assert!(!rejects_cache_param(StatusCode::BAD_REQUEST, "bad model"));
        assert!(!rejects_cache_param(StatusCode::OK, "prompt_cache_key"));
    }

    #[tokio::test]
    async fn successful_call_reports_cache_hit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(mockito::Matcher::PartialJson(json!({
                "model": "gpt-4o-mini",
                "response_format": { "type": "json_object" }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion(r#"{"category":"cardio"}"#, 512))
            .create_async()
            .await;

        let client = client(&server.url(), true);
        let response = client.enrich(request(&client)).await.unwrap();

        assert_eq!(response.fields["category"], json!("cardio"));
        assert!(response.cache_hit);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_honours_retry_after() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_header("retry-after", "12")
            .with_body("slow down")
            .create_async()
            .await;

        let client = client(&server.url(), false);
        let err = client.enrich(request(&client)).await.unwrap_err();
        assert_eq!(
            err,
            EnrichError::RateLimited {
                retry_after: Some(Duration::from_secs(12))
            }
        );
    }

    #[tokio::test]
    async fn cache_rejection_disables_caching_and_resends() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_body(r#"{"error":{"message":"Unknown parameter: prompt_cache_key"}}"#)
            .expect(2)
            .create_async()
            .await;

        let client = client(&server.url(), true);
        let request = request(&client);
        assert!(request.cache_key.is_some());

        let err = client.enrich(request).await.unwrap_err();
        assert!(matches!(err, EnrichError::Rejected { status: 400, .. }));
        assert!(!client.caching_enabled());
        assert_eq!(client.cache_key(), None);
        mock.assert_async().await;
    }
}
