//! Transport layer: provider-neutral completion requests.

#[cfg(any(feature = "openai", feature = "anthropic"))]
pub mod providers;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// LLM Provider Interface
// ============================================================================

/// Trait for LLM API providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError>;

    /// Whether the provider can enforce `json_schema` server-side. Providers
    /// that cannot get the schema inlined into the system prompt instead.
    fn supports_json_schema(&self) -> bool;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// `(schema name, schema)` for structured output
    pub json_schema: Option<(String, serde_json::Value)>,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Parsing error: {0}")]
    ParseError(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("No provider configured: {0}")]
    NotConfigured(String),
}

// ============================================================================
// Mock provider
// ============================================================================

/// Replays canned responses in order (cycling), recording every prompt it saw.
pub struct MockProvider {
    responses: Vec<Result<String, String>>,
    next: AtomicUsize,
    seen: parking_lot::Mutex<Vec<CompletionRequest>>,
    schema_support: bool,
}

impl MockProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: responses.into_iter().map(Ok).collect(),
            next: AtomicUsize::new(0),
            seen: parking_lot::Mutex::new(Vec::new()),
            schema_support: true,
        }
    }

    pub fn always(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// A provider whose every call fails with an API error
    pub fn failing(message: &str) -> Self {
        Self {
            responses: vec![Err(message.to_string())],
            next: AtomicUsize::new(0),
            seen: parking_lot::Mutex::new(Vec::new()),
            schema_support: true,
        }
    }

    pub fn without_schema_support(mut self) -> Self {
        self.schema_support = false;
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl LLMProvider for MockProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        self.seen.lock().push(request.clone());
        if self.responses.is_empty() {
            return Err(LLMError::Api("mock has no responses".to_string()));
        }
        let idx = self.next.fetch_add(1, Ordering::SeqCst) % self.responses.len();
        match &self.responses[idx] {
            Ok(content) => Ok(CompletionResponse {
                content: content.clone(),
                model: "mock".to_string(),
                prompt_tokens: 0,
                completion_tokens: 0,
            }),
            Err(message) => Err(LLMError::Api(message.clone())),
        }
    }

    fn supports_json_schema(&self) -> bool {
        self.schema_support
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
