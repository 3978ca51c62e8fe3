//! LLM API Providers
//!
//! HTTP clients for OpenAI-compatible and Anthropic endpoints. Both present
//! the same [`LLMProvider`] contract; they differ in envelope shape and in
//! whether the response schema is enforced by the server.

use super::*;
use reqwest::Client;
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================

/// LLM configuration loaded from environment or built explicitly
#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
}

impl LLMConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            return Ok(Self {
                provider: Provider::OpenAI,
                api_key: key,
                model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
                base_url: std::env::var("OPENAI_BASE_URL").ok(),
                timeout_secs: 120,
                max_tokens: 8192,
            });
        }

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            return Ok(Self {
                provider: Provider::Anthropic,
                api_key: key,
                model: std::env::var("ANTHROPIC_MODEL")
                    .unwrap_or_else(|_| "claude-3-5-sonnet-latest".to_string()),
                base_url: std::env::var("ANTHROPIC_BASE_URL").ok(),
                timeout_secs: 120,
                max_tokens: 8192,
            });
        }

        Err(ConfigError::NoProviderConfigured)
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 120,
            max_tokens: 8192,
        }
    }

    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::Anthropic,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 120,
            max_tokens: 8192,
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.trim_end_matches('/').to_string());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No LLM provider configured. Set OPENAI_API_KEY or ANTHROPIC_API_KEY")]
    NoProviderConfigured,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn http_client(config: &LLMConfig) -> Result<Client, LLMError> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| LLMError::Network(e.to_string()))
}

async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, LLMError> {
    if response.status() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);
        return Err(LLMError::RateLimited {
            retry_after_ms: retry_after * 1000,
        });
    }

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(LLMError::Api(format!("{status}: {error_text}")));
    }

    response
        .json()
        .await
        .map_err(|e| LLMError::InvalidResponse(e.to_string()))
}

// ============================================================================
// OpenAI Provider
// ============================================================================

pub struct OpenAIClient {
    client: Client,
    config: LLMConfig,
}

impl OpenAIClient {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        Ok(Self {
            client: http_client(&config)?,
            config,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
        });
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some((name, schema)) = &request.json_schema {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": {"name": name, "strict": true, "schema": schema}
            });
        }
        body
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let url = format!(
            "{}/chat/completions",
            self.config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1")
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;
        let data = read_json(response).await?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LLMError::InvalidResponse("missing choices[0].message.content".into()))?
            .to_string();

        Ok(CompletionResponse {
            content,
            model: self.config.model.clone(),
            prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
        })
    }

    fn supports_json_schema(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Anthropic Provider
// ============================================================================

pub struct AnthropicClient {
    client: Client,
    config: LLMConfig,
}

impl AnthropicClient {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        Ok(Self {
            client: http_client(&config)?,
            config,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n\n"));
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

#[async_trait]
impl LLMProvider for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let url = format!(
            "{}/v1/messages",
            self.config
                .base_url
                .as_deref()
                .unwrap_or("https://api.anthropic.com")
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;
        let data = read_json(response).await?;

        let content: String = data["content"]
            .as_array()
            .ok_or_else(|| LLMError::InvalidResponse("missing content array".into()))?
            .iter()
            .filter_map(|block| block["text"].as_str())
            .collect();

        Ok(CompletionResponse {
            content,
            model: self.config.model.clone(),
            prompt_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
        })
    }

    fn supports_json_schema(&self) -> bool {
        false
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Unified Client
// ============================================================================

/// Dispatches to the provider named in the configuration
pub enum UnifiedClient {
    OpenAI(OpenAIClient),
    Anthropic(AnthropicClient),
}

impl UnifiedClient {
    pub fn from_config(config: LLMConfig) -> Result<Self, LLMError> {
        Ok(match config.provider {
            Provider::OpenAI => Self::OpenAI(OpenAIClient::new(config)?),
            Provider::Anthropic => Self::Anthropic(AnthropicClient::new(config)?),
        })
    }

    pub fn from_env() -> Result<Self, LLMError> {
        let config = LLMConfig::from_env().map_err(|e| LLMError::NotConfigured(e.to_string()))?;
        Self::from_config(config)
    }
}

#[async_trait]
impl LLMProvider for UnifiedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        match self {
            Self::OpenAI(c) => c.complete(request).await,
            Self::Anthropic(c) => c.complete(request).await,
        }
    }

    fn supports_json_schema(&self) -> bool {
        match self {
            Self::OpenAI(c) => c.supports_json_schema(),
            Self::Anthropic(c) => c.supports_json_schema(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            Self::OpenAI(c) => c.model_name(),
            Self::Anthropic(c) => c.model_name(),
        }
    }
}
