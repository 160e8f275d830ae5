//! External completion service.
//!
//! [`CompletionService`] is the seam between the memory core and whatever
//! language model produces distillations, session digests and insights.
//! [`LlmDriver`] implements it against any OpenAI-compatible
//! `/v1/chat/completions` endpoint, such as [Ollama](https://ollama.com)
//! (`http://localhost:11434`) or the OpenAI API.
//!
//! Structured calls go through [`request_structured`], which derives the
//! JSON Schema of the expected payload with `schemars`, sends it as
//! `response_format`, enforces a deadline and parses the reply leniently
//! (code fences and surrounding prose are tolerated).  Every failure comes
//! back as a [`CompletionError`]; callers treat all of them as recoverable.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use recall_runtime::completion::{request_structured, ChatMessage, LlmDriver};
//! use recall_types::SessionDigest;
//!
//! # async fn run() -> Result<(), recall_runtime::completion::CompletionError> {
//! let driver = LlmDriver::new("http://localhost:11434", "llama3");
//! let messages = vec![
//!     ChatMessage::system("Summarise this conversation."),
//!     ChatMessage::user("User: I slept badly again\nAI: What kept you up?"),
//! ];
//! let digest: SessionDigest =
//!     request_structured(&driver, &messages, Duration::from_secs(20)).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use recall_types::RecallError;
use schemars::JsonSchema;
use schemars::schema_for;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// JSON output guidelines
// ─────────────────────────────────────────────────────────────────────────────

/// Output rules appended to every system message of a structured request.
pub const JSON_GUIDELINES: &str = "\
## Output rules
- Respond with a single JSON object and nothing else.
- Use exactly the field names of the requested schema.
- Only include information the user actually stated; never invent details.
- Use empty arrays or empty strings when nothing applies.";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from a completion request.
#[derive(Error, Debug)]
pub enum CompletionError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response envelope was not the expected chat-completion shape.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    /// The model replied, but not with the requested JSON payload.
    #[error("Malformed JSON payload: {0}")]
    Malformed(String),
    /// No reply within the deadline; the in-flight call was abandoned.
    #[error("Completion timed out after {0:?}")]
    Timeout(Duration),
}

impl From<CompletionError> for RecallError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Timeout(d) => RecallError::Timeout { millis: d.as_millis() as u64 },
            other => RecallError::UpstreamAnalysis(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

/// The role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CompletionService
// ─────────────────────────────────────────────────────────────────────────────

/// A request/response text-completion backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Free-form reply to `messages`.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;

    /// Reply constrained to JSON matching `schema`.  Returns the raw text;
    /// parsing is the caller's job.
    async fn complete_json(
        &self,
        messages: &[ChatMessage],
        schema: serde_json::Value,
    ) -> Result<String, CompletionError>;
}

/// Ask `service` for a `T` and parse the reply, giving up after `timeout`.
pub async fn request_structured<T>(
    service: &dyn CompletionService,
    messages: &[ChatMessage],
    timeout: Duration,
) -> Result<T, CompletionError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = serde_json::to_value(schema_for!(T)).map_err(|e| CompletionError::Malformed(e.to_string()))?;
    let raw = tokio::time::timeout(timeout, service.complete_json(messages, schema))
        .await
        .map_err(|_| CompletionError::Timeout(timeout))??;
    debug!(bytes = raw.len(), "structured completion received");
    parse_json_reply(&raw)
}

/// Parse the outermost JSON object in `raw`, ignoring code fences or prose
/// around it.
pub fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> Result<T, CompletionError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if e > s => &raw[s..=e],
        _ => return Err(CompletionError::Malformed("no JSON object in reply".into())),
    };
    serde_json::from_str(body).map_err(|e| CompletionError::Malformed(e.to_string()))
}

/// Append [`JSON_GUIDELINES`] to every system message, prepending one if
/// the conversation has none.
pub fn with_json_guidelines(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut augmented: Vec<ChatMessage> = messages
        .iter()
        .map(|m| {
            if m.role == Role::System {
                ChatMessage::system(format!("{}\n\n{}", m.content, JSON_GUIDELINES))
            } else {
                m.clone()
            }
        })
        .collect();
    if !augmented.iter().any(|m| m.role == Role::System) {
        augmented.insert(0, ChatMessage::system(JSON_GUIDELINES));
    }
    augmented
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal request / response shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: serde_json::Value,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmDriver
// ─────────────────────────────────────────────────────────────────────────────

/// Async client for an OpenAI-compatible chat-completions endpoint.
///
/// Construct once and share behind an `Arc`.
pub struct LlmDriver {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl LlmDriver {
    /// Create a driver pointing at `base_url` (e.g. `"http://localhost:11434"`)
    /// and using `model` (e.g. `"llama3"`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Bound every HTTP request to `timeout`.  Keeps the current client if
    /// a new one cannot be built.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => self.client = client,
            Err(e) => debug!(error = %e, "keeping default HTTP client"),
        }
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        response_format: Option<ResponseFormat>,
    ) -> Result<String, CompletionError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest { model: &self.model, messages, stream: false, response_format };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: ChatResponse = request.send().await?.error_for_status()?.json().await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CompletionError::BadResponse("empty choices array".into()))
    }
}

#[async_trait]
impl CompletionService for LlmDriver {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        self.send(messages, None).await
    }

    async fn complete_json(
        &self,
        messages: &[ChatMessage],
        schema: serde_json::Value,
    ) -> Result<String, CompletionError> {
        let augmented = with_json_guidelines(messages);
        let format = ResponseFormat {
            kind: "json_schema",
            json_schema: serde_json::json!({ "name": "recall_payload", "schema": schema }),
        };
        self.send(&augmented, Some(format)).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
