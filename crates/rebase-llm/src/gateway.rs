//! LLM-backed [`MappingGateway`].

use crate::llm::{CompletionRequest, LLMError, LLMProvider, Message};
use crate::prompt::{FamilyMappingPrompt, PromptStrategy, ResponseSchema, TypeMappingPrompt};
use crate::{MappingGateway, MappingRequest, MappingResult};
use async_trait::async_trait;
use std::sync::Arc;

pub struct LlmMappingGateway {
    provider: Arc<dyn LLMProvider>,
    family_prompt: Box<dyn PromptStrategy>,
    type_prompt: Box<dyn PromptStrategy>,
    temperature: f32,
}

impl LlmMappingGateway {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            family_prompt: Box::new(FamilyMappingPrompt),
            type_prompt: Box::new(TypeMappingPrompt),
            temperature: 0.0,
        }
    }

    /// Replace the strategy used for the strategy's own schema variant
    pub fn with_strategy(mut self, strategy: Box<dyn PromptStrategy>) -> Self {
        match strategy.response_schema() {
            ResponseSchema::FamilyMapping => self.family_prompt = strategy,
            ResponseSchema::TypeMapping => self.type_prompt = strategy,
        }
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn strategy_for(&self, schema: ResponseSchema) -> &dyn PromptStrategy {
        match schema {
            ResponseSchema::FamilyMapping => self.family_prompt.as_ref(),
            ResponseSchema::TypeMapping => self.type_prompt.as_ref(),
        }
    }

    fn build_request(&self, request: &MappingRequest) -> CompletionRequest {
        let strategy = self.strategy_for(request.schema);
        let schema = strategy.response_schema();
        let mut system = strategy.system_prompt();

        let json_schema = if self.provider.supports_json_schema() {
            Some((schema.name().to_string(), schema.json_schema()))
        } else {
            system.push_str("\n\nThe answer must validate against this JSON schema:\n");
            system.push_str(&schema.json_schema().to_string());
            None
        };

        CompletionRequest {
            messages: vec![
                Message::system(system),
                Message::user(strategy.user_prompt(request)),
            ],
            max_tokens: None,
            temperature: Some(self.temperature),
            json_schema,
        }
    }
}

#[async_trait]
impl MappingGateway for LlmMappingGateway {
    async fn map_catalogs(
        &self,
        request: &MappingRequest,
    ) -> Result<Vec<MappingResult>, LLMError> {
        if request.old.is_empty() {
            return Ok(Vec::new());
        }

        let completion = self.build_request(request);
        tracing::info!(
            model = self.provider.model_name(),
            schema = request.schema.name(),
            old = request.old.len(),
            new = request.new.len(),
            "requesting catalog mapping"
        );

        let response = self.provider.complete(&completion).await?;
        let results = parse_mapping_response(&response.content, request.schema)?;
        tracing::info!(
            results = results.len(),
            prompt_tokens = response.prompt_tokens,
            completion_tokens = response.completion_tokens,
            "catalog mapping received"
        );
        Ok(results)
    }

    fn name(&self) -> &str {
        self.provider.model_name()
    }
}

/// Parse a model answer into mapping results.
///
/// Accepts `{"mappings": [...]}` or a bare array, optionally wrapped in a
/// single markdown fence. For [`ResponseSchema::TypeMapping`] any
/// `subMatches` the model volunteers are dropped.
pub fn parse_mapping_response(
    content: &str,
    schema: ResponseSchema,
) -> Result<Vec<MappingResult>, LLMError> {
    let body = strip_fence(content);
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| LLMError::ParseError(e.to_string()))?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("mappings") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(LLMError::InvalidResponse(
                    "expected a \"mappings\" array".to_string(),
                ))
            }
        },
        _ => {
            return Err(LLMError::InvalidResponse(
                "expected a JSON object or array".to_string(),
            ))
        }
    };

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<MappingResult>(item) {
            Ok(mut result) => {
                if schema == ResponseSchema::TypeMapping {
                    result.sub_matches.clear();
                }
                results.push(result);
            }
            Err(err) => tracing::warn!(error = %err, "skipping malformed mapping item"),
        }
    }
    Ok(results)
}

fn strip_fence(content: &str) -> &str {
    let s = content.trim();
    let Some(inner) = s.strip_prefix("```") else {
        return s;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim()
}
