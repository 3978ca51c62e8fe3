//! Rebase LLM: AI-assisted catalog mapping
//!
//! Given the unresolved part of an old catalog and the full new catalog, ask a
//! language model for best-effort name correspondences:
//!
//! ```text
//! MappingRequest ──► PromptStrategy ──► LLMProvider ──► JSON ──► Vec<MappingResult>
//!   (schema tag)      (system/user)     (OpenAI,         (lenient
//!                                        Anthropic)       parsing)
//! ```
//!
//! The gateway makes exactly one attempt per request. Callers treat any error
//! as "no mapping" for the whole request.

pub mod gateway;
pub mod llm;
pub mod prompt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use gateway::{parse_mapping_response, LlmMappingGateway};
pub use llm::{
    CompletionRequest, CompletionResponse, LLMError, LLMProvider, Message, MockProvider, Role,
};
pub use prompt::{FamilyMappingPrompt, PromptStrategy, ResponseSchema, TypeMappingPrompt};

#[cfg(any(feature = "openai", feature = "anthropic"))]
pub use llm::providers::{ConfigError, LLMConfig, Provider, UnifiedClient};

/// Sentinel the model uses for "nothing in the new catalog corresponds".
pub const NO_MATCH: &str = "No Match";

// ============================================================================
// Request / response types
// ============================================================================

/// One catalog entry as presented to the model: a name and its sub-entry names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSummary {
    pub name: String,
    #[serde(default)]
    pub sub_names: Vec<String>,
}

impl CatalogSummary {
    pub fn new(name: &str, sub_names: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            sub_names: sub_names.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRequest {
    /// Which response shape the caller expects back
    pub schema: ResponseSchema,
    pub old: Vec<CatalogSummary>,
    pub new: Vec<CatalogSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubMatch {
    pub old: String,
    pub new: String,
}

impl SubMatch {
    pub fn target(&self) -> Option<&str> {
        resolve_target(&self.new)
    }
}

/// One name-level correspondence proposed by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingResult {
    pub old: String,
    pub new: String,
    #[serde(default, alias = "sub_matches")]
    pub sub_matches: Vec<SubMatch>,
}

impl MappingResult {
    pub fn new(old: &str, new: &str) -> Self {
        Self {
            old: old.to_string(),
            new: new.to_string(),
            sub_matches: Vec::new(),
        }
    }

    pub fn no_match(old: &str) -> Self {
        Self::new(old, NO_MATCH)
    }

    pub fn with_sub(mut self, old: &str, new: &str) -> Self {
        self.sub_matches.push(SubMatch {
            old: old.to_string(),
            new: new.to_string(),
        });
        self
    }

    /// The proposed target name, or `None` for "No Match"
    pub fn target(&self) -> Option<&str> {
        resolve_target(&self.new)
    }
}

fn resolve_target(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NO_MATCH) {
        None
    } else {
        Some(trimmed)
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Anything that can answer a [`MappingRequest`].
#[async_trait]
pub trait MappingGateway: Send + Sync {
    async fn map_catalogs(&self, request: &MappingRequest)
        -> Result<Vec<MappingResult>, LLMError>;

    fn name(&self) -> &str;
}

/// Returns a fixed set of results regardless of the request.
#[derive(Debug, Clone, Default)]
pub struct StaticGateway {
    results: Vec<MappingResult>,
}

impl StaticGateway {
    pub fn new(results: Vec<MappingResult>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl MappingGateway for StaticGateway {
    async fn map_catalogs(
        &self,
        _request: &MappingRequest,
    ) -> Result<Vec<MappingResult>, LLMError> {
        Ok(self.results.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Used when AI mapping is switched off: nothing is ever mapped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGateway;

#[async_trait]
impl MappingGateway for DisabledGateway {
    async fn map_catalogs(
        &self,
        _request: &MappingRequest,
    ) -> Result<Vec<MappingResult>, LLMError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "disabled"
    }
}
