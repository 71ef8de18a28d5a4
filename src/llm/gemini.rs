use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::utils::http::build_http_client;
use crate::utils::timing::log_llm_timing;

#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("Gemini request failed: {message}")]
    Transport {
        message: String,
        timeout: bool,
        connect: bool,
    },
    #[error("Gemini request failed with status {status}: {detail}")]
    Status { status: StatusCode, detail: String },
    #[error("Failed to decode Gemini response: {0}")]
    Decode(String),
}

impl GeminiError {
    /// Whether a later attempt could plausibly succeed. Only reported in logs.
    pub fn is_retryable(&self) -> bool {
        match self {
            GeminiError::Transport {
                timeout, connect, ..
            } => *timeout || *connect,
            GeminiError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || status.is_server_error()
            }
            GeminiError::Decode(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: String },
}

impl Part {
    fn to_json(&self) -> Value {
        match self {
            Part::Text(text) => json!({ "text": text }),
            Part::InlineData { mime_type, data } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": data
                }
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    GoogleSearch,
}

impl Tool {
    fn to_json(self) -> Value {
        match self {
            Tool::GoogleSearch => json!({ "google_search": {} }),
        }
    }
}

/// One `generateContent` call: a single user turn plus optional tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub model: String,
    pub operation: &'static str,
    pub parts: Vec<Part>,
    pub tools: Vec<Tool>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, operation: &'static str, parts: Vec<Part>) -> Self {
        Self {
            model: model.into(),
            operation,
            parts,
            tools: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn to_payload(&self) -> Value {
        let parts: Vec<Value> = self.parts.iter().map(Part::to_json).collect();
        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{ "role": "user", "parts": parts }]),
        );
        if !self.tools.is_empty() {
            let tools: Vec<Value> = self.tools.iter().map(|tool| tool.to_json()).collect();
            payload.insert("tools".to_string(), Value::Array(tools));
        }
        Value::Object(payload)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Option<Vec<ResponsePart>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thought: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Option<Vec<GroundingChunk>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroundingChunk {
    #[serde(default)]
    pub web: Option<WebChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebChunk {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GenerateResponse {
    fn first_candidate(&self) -> Option<&Candidate> {
        self.candidates.as_deref().and_then(|candidates| candidates.first())
    }

    /// Concatenated non-thought text of the first candidate.
    pub fn text(&self) -> String {
        let Some(parts) = self
            .first_candidate()
            .and_then(|candidate| candidate.content.as_ref())
            .and_then(|content| content.parts.as_deref())
        else {
            return String::new();
        };

        parts
            .iter()
            .filter(|part| !part.thought.unwrap_or(false))
            .filter_map(|part| part.text.as_deref())
            .collect()
    }

    /// Grounding chunks of the first candidate; empty when any level is absent.
    pub fn grounding_chunks(&self) -> &[GroundingChunk] {
        self.first_candidate()
            .and_then(|candidate| candidate.grounding_metadata.as_ref())
            .and_then(|metadata| metadata.grounding_chunks.as_deref())
            .unwrap_or(&[])
    }
}

/// The remote model boundary. `GeminiClient` is the only production
/// implementation.
#[async_trait]
pub trait RemoteModel: Send + Sync {
    async fn generate_content(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, GeminiError>;
}

pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            http: build_http_client(config.gemini_request_timeout)?,
            api_key: config.gemini_api_key.clone(),
            base_url: config.gemini_base_url.clone(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    fn redact(&self, text: &str) -> String {
        redact_api_key(text, &self.api_key)
    }

    async fn call_api(&self, request: &GenerateRequest) -> Result<GenerateResponse, GeminiError> {
        let payload = request.to_payload();
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                target: "llm.gemini",
                model = %request.model,
                payload = %summarize_payload(&payload)
            );
        }

        let response = self
            .http
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                let message = self.redact(&err.to_string());
                warn!(
                    "Gemini request failed to send: {} (timeout={}, connect={})",
                    message,
                    err.is_timeout(),
                    err.is_connect()
                );
                GeminiError::Transport {
                    message,
                    timeout: err.is_timeout(),
                    connect: err.is_connect(),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&self.redact(&body));
            warn!("Gemini API error: status={}, body={}", status, body_summary);
            return Err(GeminiError::Status {
                status,
                detail: message.unwrap_or(body_summary),
            });
        }

        let body = response.text().await.map_err(|err| GeminiError::Transport {
            message: self.redact(&err.to_string()),
            timeout: err.is_timeout(),
            connect: err.is_connect(),
        })?;
        let value = serde_json::from_str::<GenerateResponse>(&body)
            .map_err(|err| GeminiError::Decode(err.to_string()))?;

        if value.first_candidate().is_none() {
            let block_reason = value
                .prompt_feedback
                .as_ref()
                .and_then(|feedback| feedback.block_reason.as_deref());
            warn!(
                "Gemini returned no candidates for {} (block_reason={:?})",
                request.operation, block_reason
            );
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                target: "llm.gemini",
                model = %request.model,
                response = %summarize_response(&value)
            );
        }
        Ok(value)
    }
}

#[async_trait]
impl RemoteModel for GeminiClient {
    async fn generate_content(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, GeminiError> {
        log_llm_timing("gemini", &request.model, request.operation, || {
            self.call_api(request)
        })
        .await
    }
}

fn redact_api_key(text: &str, api_key: &str) -> String {
    let key = api_key.trim();
    if key.is_empty() {
        return text.to_string();
    }
    text.replace(key, "[redacted]")
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_payload(payload: &Value) -> Value {
    let parts = payload
        .pointer("/contents/0/parts")
        .and_then(|value| value.as_array())
        .map(|parts| {
            parts
                .iter()
                .map(|part| {
                    if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                        json!({ "text": truncate_for_log(text, 200) })
                    } else if let Some(inline_data) = part.get("inlineData") {
                        let mime_type = inline_data
                            .get("mimeType")
                            .and_then(|value| value.as_str())
                            .unwrap_or("unknown");
                        let data_len = inline_data
                            .get("data")
                            .and_then(|value| value.as_str())
                            .map(str::len)
                            .unwrap_or(0);
                        json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
                    } else {
                        json!({ "unknownPart": true })
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut summary = Map::new();
    summary.insert("parts".to_string(), Value::Array(parts));
    if let Some(tools) = payload.get("tools") {
        summary.insert("tools".to_string(), tools.clone());
    }
    Value::Object(summary)
}

fn summarize_response(response: &GenerateResponse) -> Value {
    let text = response.text();
    let preview = (!text.trim().is_empty()).then(|| truncate_for_log(&text, 200));
    json!({
        "candidates": response.candidates.as_ref().map(Vec::len).unwrap_or(0),
        "groundingChunks": response.grounding_chunks().len(),
        "finishReason": response
            .first_candidate()
            .and_then(|candidate| candidate.finish_reason.clone()),
        "textPreview": preview
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_payload_puts_inline_data_before_text() {
        let request = GenerateRequest::new(
            "gemini-2.5-flash",
            "analyze_image",
            vec![
                Part::InlineData {
                    mime_type: "image/png".to_string(),
                    data: "aGVsbG8=".to_string(),
                },
                Part::Text("What is this?".to_string()),
            ],
        );

        assert_eq!(
            request.to_payload(),
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "inlineData": { "mimeType": "image/png", "data": "aGVsbG8=" } },
                        { "text": "What is this?" }
                    ]
                }]
            })
        );
    }

    #[test]
    fn search_payload_enables_google_search() {
        let request = GenerateRequest::new(
            "gemini-2.5-flash",
            "search_web",
            vec![Part::Text("latest rust release".to_string())],
        )
        .with_tool(Tool::GoogleSearch);

        let payload = request.to_payload();
        assert_eq!(payload["tools"], json!([{ "google_search": {} }]));
    }

    #[test]
    fn text_joins_first_candidate_parts_and_skips_thoughts() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [
                {
                    "content": {
                        "role": "model",
                        "parts": [
                            { "text": "thinking...", "thought": true },
                            { "text": "The sky " },
                            { "text": "is blue." }
                        ]
                    },
                    "finishReason": "STOP"
                },
                { "content": { "parts": [{ "text": "second candidate" }] } }
            ]
        }))
        .unwrap();

        assert_eq!(response.text(), "The sky is blue.");
    }

    #[test]
    fn missing_grounding_at_any_level_yields_no_chunks() {
        let shapes = [
            json!({}),
            json!({ "candidates": [] }),
            json!({ "candidates": [{ "content": { "parts": [{ "text": "hi" }] } }] }),
            json!({ "candidates": [{ "groundingMetadata": {} }] }),
            json!({ "candidates": [{ "groundingMetadata": { "webSearchQueries": ["q"] } }] }),
        ];

        for shape in shapes {
            let response: GenerateResponse = serde_json::from_value(shape.clone()).unwrap();
            assert!(response.grounding_chunks().is_empty(), "shape: {shape}");
        }
    }

    #[test]
    fn reads_grounding_chunks_in_order() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "answer" }] },
                "groundingMetadata": {
                    "groundingChunks": [
                        { "web": { "uri": "https://a.example", "title": "A" } },
                        { "web": { "uri": "https://b.example" } },
                        { "retrievedContext": { "uri": "gs://bucket/doc" } }
                    ]
                }
            }]
        }))
        .unwrap();

        let chunks = response.grounding_chunks();
        assert_eq!(chunks.len(), 3);
        let first = chunks[0].web.as_ref().unwrap();
        assert_eq!(first.title.as_deref(), Some("A"));
        assert!(chunks[1].web.as_ref().unwrap().title.is_none());
        assert!(chunks[2].web.is_none());
    }

    #[test]
    fn classifies_retryable_failures() {
        let rate_limited = GeminiError::Status {
            status: StatusCode::TOO_MANY_REQUESTS,
            detail: "quota".to_string(),
        };
        let bad_key = GeminiError::Status {
            status: StatusCode::FORBIDDEN,
            detail: "API key not valid".to_string(),
        };
        assert!(rate_limited.is_retryable());
        assert!(!bad_key.is_retryable());
        assert!(!GeminiError::Decode("eof".to_string()).is_retryable());
    }

    #[test]
    fn redacts_key_and_extracts_error_message() {
        assert_eq!(
            redact_api_key("bad key AIzaSECRET used", "AIzaSECRET"),
            "bad key [redacted] used"
        );
        let (message, _) =
            summarize_error_body(r#"{"error":{"code":400,"message":"API key not valid."}}"#);
        assert_eq!(message.as_deref(), Some("API key not valid."));
        assert_eq!(summarize_error_body("  ").1, "empty response body");
    }

    #[test]
    fn payload_summary_hides_image_data() {
        let request = GenerateRequest::new(
            "gemini-2.5-flash",
            "analyze_image",
            vec![
                Part::InlineData {
                    mime_type: "image/webp".to_string(),
                    data: "QUJDRA==".to_string(),
                },
                Part::Text("describe".to_string()),
            ],
        );
        let summary = summarize_payload(&request.to_payload());
        assert_eq!(
            summary["parts"][0],
            json!({ "inlineData": { "mimeType": "image/webp", "dataLen": 8 } })
        );
    }
}
