//! Per-entry reconciliation state.
//!
//! ```text
//!            ┌──► ExactMatch ──┐
//!            │                 ├──► Processed
//! Pending ───┼──► AiMapped ────┘
//!            │        │
//!            │        └──────────────► Failed
//!            ├──► ToRename
//!            ├──► ToDelete
//!            └──► Failed
//! ```

use crate::error::{RebaseError, Result};
use rebase_llm::MappingResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Pending,
    ExactMatch,
    AiMapped,
    Processed,
    ToRename,
    ToDelete,
    Failed,
}

impl MappingStatus {
    pub fn can_become(self, next: MappingStatus) -> bool {
        use MappingStatus::*;
        matches!(
            (self, next),
            (Pending, ExactMatch | AiMapped | ToRename | ToDelete | Failed)
                | (ExactMatch | AiMapped, Processed | Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MappingStatus::Processed
                | MappingStatus::ToRename
                | MappingStatus::ToDelete
                | MappingStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSource {
    ExactMatch,
    Ai,
    NotMapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubStatus {
    Mapped,
    /// The proposed target sub-entry does not exist
    NotFound,
    /// Explicitly unmatched
    NoMatch,
    /// Nothing proposed; instances stay on the old sub-entry
    KeptOld,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubEntryMapping {
    pub source: String,
    pub target: Option<String>,
    pub status: SubStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub source_name: String,
    pub target_name: Option<String>,
    pub status: MappingStatus,
    pub source: MappingSource,
    pub sub_mappings: Vec<SubEntryMapping>,
}

impl MappingEntry {
    pub fn pending(source_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            target_name: None,
            status: MappingStatus::Pending,
            source: MappingSource::NotMapped,
            sub_mappings: Vec::new(),
        }
    }

    pub fn exact(name: &str, sub_mappings: Vec<SubEntryMapping>) -> Self {
        Self {
            source_name: name.to_string(),
            target_name: Some(name.to_string()),
            status: MappingStatus::ExactMatch,
            source: MappingSource::ExactMatch,
            sub_mappings,
        }
    }

    /// Move to `next`, rejecting changes the lifecycle does not allow
    pub fn advance(&mut self, next: MappingStatus) -> Result<()> {
        if !self.status.can_become(next) {
            return Err(RebaseError::InvalidTransition {
                entry: self.source_name.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Has a target and is headed for (or through) the switch path
    pub fn is_resolved(&self) -> bool {
        self.target_name.is_some()
            && matches!(
                self.status,
                MappingStatus::ExactMatch | MappingStatus::AiMapped | MappingStatus::Processed
            )
    }

    pub fn mapped_subs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sub_mappings.iter().filter_map(|m| match (&m.status, &m.target) {
            (SubStatus::Mapped, Some(target)) => Some((m.source.as_str(), target.as_str())),
            _ => None,
        })
    }

    /// Name-level result for the identifier map builder, `None` unless resolved
    pub fn to_mapping_result(&self) -> Option<MappingResult> {
        if !self.is_resolved() {
            return None;
        }
        let target = self.target_name.as_deref()?;
        let result = self
            .mapped_subs()
            .fold(MappingResult::new(&self.source_name, target), |r, (old, new)| {
                r.with_sub(old, new)
            });
        Some(result)
    }
}
