//! LLM gateway — the single seam through which Planner, Resolvers and the
//! HITL gate talk to a language model (spec §6).
//!
//! Generalizes the named multi-provider proxy pattern (register providers,
//! route by name, fall back to a default) down to the shape this pipeline
//! actually needs: one gateway trait with a free-text `complete` and a
//! `complete_json` that retries a bounded number of times before giving up,
//! so callers can implement their own deterministic fallback instead of
//! propagating a raw parse error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// One message in a chat-style completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// Request shared by `complete` and `complete_json` (spec §6).
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub request_id: Option<String>,
}

/// A completed chat response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
}

/// Errors a gateway or its callers can encounter.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    RequestFailed(String),
    #[error("llm response was not valid JSON after {attempts} attempt(s): {last_error}")]
    MalformedJson { attempts: u32, last_error: String },
}

/// Internal retry budget for `complete_json` (spec §6: "raises on malformed
/// after N internal retries").
const JSON_RETRY_ATTEMPTS: u32 = 3;

/// Trait for LLM-backed completion (spec §6).
///
/// Allows swapping between real HTTP providers and deterministic test
/// doubles without touching any caller.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Free-text completion.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// JSON-mode completion: calls `complete`, strips markdown code fences
    /// and `<think>` scratchpad blocks a model may wrap its answer in, and
    /// parses the result. Retries the whole request up to
    /// [`JSON_RETRY_ATTEMPTS`] times before surfacing
    /// [`LlmError::MalformedJson`] to the caller, who is expected to fall
    /// back to a deterministic rule-based path rather than propagate.
    async fn complete_json(
        &self,
        request: CompletionRequest,
    ) -> Result<serde_json::Value, LlmError> {
        let mut last_error = String::new();
        for attempt in 1..=JSON_RETRY_ATTEMPTS {
            let response = self.complete(request.clone()).await?;
            let candidate = strip_json_wrapping(&response.content);
            match serde_json::from_str::<serde_json::Value>(candidate) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_error = e.to_string();
                    warn!(attempt, error = %last_error, "llm response was not valid JSON, retrying");
                }
            }
        }
        Err(LlmError::MalformedJson {
            attempts: JSON_RETRY_ATTEMPTS,
            last_error,
        })
    }
}

/// Strip `<think>...</think>` scratchpad blocks and markdown code fences
/// that reasoning-tuned models sometimes wrap JSON output in.
fn strip_json_wrapping(raw: &str) -> &str {
    let mut text = raw.trim();

    if let (Some(start), Some(end)) = (text.find("<think>"), text.find("</think>")) {
        if end > start {
            text = text[end.saturating_add("</think>".len())..].trim();
        }
    }

    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped.trim();
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped.trim();
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped.trim();
    }

    text
}

// ── Ollama chat provider ──

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponseMessage {
    content: String,
}

/// Local Ollama-compatible provider, speaking `/api/chat` (spec §6, ambient
/// LLM stack).
pub struct OllamaGateway {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmGateway for OllamaGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest {
            model: &request.model,
            messages: &request.messages,
            stream: false,
            options: OllamaOptions { temperature: request.temperature },
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed(format!("HTTP {status}: {text}")));
        }

        let parsed: OllamaChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        Ok(CompletionResponse { content: parsed.message.content })
    }
}

// ── OpenAI-compatible chat provider (cloud gateway) ──

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: ChatMessage,
}

/// OpenAI-chat-completions-compatible provider, used for the optional
/// cloud escalation path (spec §6 ambient LLM stack).
pub struct OpenAiCompatibleGateway {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmGateway for OpenAiCompatibleGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = OpenAiChatRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed(format!("HTTP {status}: {text}")));
        }

        let parsed: OpenAiChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| CompletionResponse { content: c.message.content })
            .ok_or_else(|| LlmError::RequestFailed("empty choices array".to_string()))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            model: "llama3".to_string(),
            temperature: 0.3,
            max_tokens: 100,
            request_id: None,
        }
    }

    #[tokio::test]
    async fn complete_json_parses_plain_json() {
        let gw = MockGateway { response: r#"{"a":1}"#.to_string() };
        let value = gw.complete_json(request()).await.unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn complete_json_strips_markdown_fence() {
        let gw = MockGateway { response: "```json\n{\"a\":1}\n```".to_string() };
        let value = gw.complete_json(request()).await.unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn complete_json_strips_think_block() {
        let gw = MockGateway {
            response: "<think>reasoning here</think>{\"a\":1}".to_string(),
        };
        let value = gw.complete_json(request()).await.unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn complete_json_retries_then_succeeds() {
        let gw = ScriptedGateway::new(vec![
            "not json".to_string(),
            "still not json".to_string(),
            r#"{"ok":true}"#.to_string(),
        ]);
        let value = gw.complete_json(request()).await.unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn complete_json_exhausts_retries_and_errors() {
        let gw = MockGateway { response: "never valid".to_string() };
        let err = gw.complete_json(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::MalformedJson { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn failing_gateway_propagates_request_error() {
        let gw = FailingGateway;
        let err = gw.complete(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed(_)));
    }
}
