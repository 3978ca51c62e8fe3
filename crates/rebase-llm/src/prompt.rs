//! Prompt strategies and the response schemas they declare.
//!
//! A strategy never inspects types at runtime to decide which JSON shape the
//! model must produce: the request carries a [`ResponseSchema`] tag and the
//! gateway picks the strategy registered for that tag.

use crate::{CatalogSummary, MappingRequest, NO_MATCH};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// The response shape a request expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSchema {
    /// Families with nested type correspondences (`subMatches`)
    FamilyMapping,
    /// Flat type-to-type correspondences
    TypeMapping,
}

impl ResponseSchema {
    pub fn name(self) -> &'static str {
        match self {
            ResponseSchema::FamilyMapping => "family_mapping",
            ResponseSchema::TypeMapping => "type_mapping",
        }
    }

    /// JSON schema for the model's structured output
    pub fn json_schema(self) -> serde_json::Value {
        let pair = serde_json::json!({
            "type": "object",
            "properties": {
                "old": {"type": "string"},
                "new": {"type": "string"}
            },
            "required": ["old", "new"],
            "additionalProperties": false
        });

        let item = match self {
            ResponseSchema::TypeMapping => pair,
            ResponseSchema::FamilyMapping => serde_json::json!({
                "type": "object",
                "properties": {
                    "old": {"type": "string"},
                    "new": {"type": "string"},
                    "subMatches": {"type": "array", "items": pair}
                },
                "required": ["old", "new", "subMatches"],
                "additionalProperties": false
            }),
        };

        serde_json::json!({
            "type": "object",
            "properties": {
                "mappings": {"type": "array", "items": item}
            },
            "required": ["mappings"],
            "additionalProperties": false
        })
    }
}

/// How a request is turned into prompt text.
pub trait PromptStrategy: Send + Sync {
    fn system_prompt(&self) -> String;

    fn user_prompt(&self, request: &MappingRequest) -> String;

    fn response_schema(&self) -> ResponseSchema;
}

fn render_catalog(out: &mut String, title: &str, entries: &[CatalogSummary], with_subs: bool) {
    let _ = writeln!(out, "{title}:");
    for entry in entries {
        if with_subs && !entry.sub_names.is_empty() {
            let _ = writeln!(out, "- {} [{}]", entry.name, entry.sub_names.join("; "));
        } else {
            let _ = writeln!(out, "- {}", entry.name);
        }
    }
    out.push('\n');
}

/// Maps loadable families and their types.
#[derive(Debug, Clone, Copy, Default)]
pub struct FamilyMappingPrompt;

impl PromptStrategy for FamilyMappingPrompt {
    fn system_prompt(&self) -> String {
        format!(
            r#"You reconcile building-component catalogs.
You receive an OLD list of families (with their types in brackets) and a NEW
standardized list. For every OLD family pick the single NEW family describing
the same real-world component, judging by function, geometry hints and naming
conventions. Then pair each OLD type with the closest NEW type of the chosen
family, preferring matching dimensions.

Rules:
- Use names exactly as written in the NEW list.
- If nothing corresponds, answer "{NO_MATCH}" for that family or type.
- Return every OLD family exactly once.
- Answer with JSON only: {{"mappings":[{{"old":..,"new":..,"subMatches":[{{"old":..,"new":..}}]}}]}}"#
        )
    }

    fn user_prompt(&self, request: &MappingRequest) -> String {
        let mut out = String::new();
        render_catalog(&mut out, "OLD", &request.old, true);
        render_catalog(&mut out, "NEW", &request.new, true);
        out
    }

    fn response_schema(&self) -> ResponseSchema {
        ResponseSchema::FamilyMapping
    }
}

/// Maps system element types by name only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeMappingPrompt;

impl PromptStrategy for TypeMappingPrompt {
    fn system_prompt(&self) -> String {
        format!(
            r#"You reconcile building element type catalogs (walls, floors, roofs...).
For every OLD type pick the single NEW type with the same construction
purpose, preferring equal thickness and material descriptions.

Rules:
- Use names exactly as written in the NEW list.
- If nothing corresponds, answer "{NO_MATCH}".
- Return every OLD type exactly once.
- Answer with JSON only: {{"mappings":[{{"old":..,"new":..}}]}}"#
        )
    }

    fn user_prompt(&self, request: &MappingRequest) -> String {
        let mut out = String::new();
        render_catalog(&mut out, "OLD", &request.old, false);
        render_catalog(&mut out, "NEW", &request.new, false);
        out
    }

    fn response_schema(&self) -> ResponseSchema {
        ResponseSchema::TypeMapping
    }
}
