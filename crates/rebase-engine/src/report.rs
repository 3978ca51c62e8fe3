//! Run and per-category results.

use crate::config::{CatalogKind, CategoryDescriptor};
use crate::id_map::IdMapStats;
use crate::mapping::{MappingEntry, MappingStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "message")]
pub enum RunOutcome {
    Completed,
    CompletedWithErrors,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryReport {
    pub category: String,
    pub kind: CatalogKind,
    pub total_entries: usize,
    pub exact_matches: usize,
    pub ai_mapped: usize,
    pub switched_instances: usize,
    pub renamed: usize,
    pub deleted: usize,
    /// Candidates nested inside other instances, never switched
    pub skipped_nested: usize,
    /// Candidates left inside groups
    pub skipped_grouped: usize,
    pub id_map: IdMapStats,
    pub entries: Vec<MappingEntry>,
    pub errors: Vec<String>,
    /// False when a fatal error stopped the remaining stages of this category
    pub completed: bool,
}

impl CategoryReport {
    pub fn new(descriptor: &CategoryDescriptor) -> Self {
        Self {
            category: descriptor.category.clone(),
            kind: descriptor.kind,
            total_entries: 0,
            exact_matches: 0,
            ai_mapped: 0,
            switched_instances: 0,
            renamed: 0,
            deleted: 0,
            skipped_nested: 0,
            skipped_grouped: 0,
            id_map: IdMapStats::default(),
            entries: Vec::new(),
            errors: Vec::new(),
            completed: false,
        }
    }

    /// Record a per-item failure
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(category = %self.category, "{message}");
        self.errors.push(message);
    }

    pub fn count_status(&self, status: MappingStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_entries: usize,
    pub exact_matches: usize,
    pub ai_mapped: usize,
    pub switched_instances: usize,
    pub renamed: usize,
    pub deleted: usize,
    pub parameters_added: usize,
    pub parameters_removed: usize,
    pub errors: Vec<String>,
    pub categories: Vec<CategoryReport>,
}

impl RunResult {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            outcome: RunOutcome::Completed,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            total_entries: 0,
            exact_matches: 0,
            ai_mapped: 0,
            switched_instances: 0,
            renamed: 0,
            deleted: 0,
            parameters_added: 0,
            parameters_removed: 0,
            errors: Vec::new(),
            categories: Vec::new(),
        }
    }

    /// Fold a finished category into the totals
    pub fn absorb(&mut self, report: CategoryReport) {
        self.total_entries += report.total_entries;
        self.exact_matches += report.exact_matches;
        self.ai_mapped += report.ai_mapped;
        self.switched_instances += report.switched_instances;
        self.renamed += report.renamed;
        self.deleted += report.deleted;
        self.errors.extend(
            report
                .errors
                .iter()
                .map(|e| format!("[{}] {e}", report.category)),
        );
        self.categories.push(report);
    }

    pub fn category(&self, name: &str) -> Option<&CategoryReport> {
        self.categories.iter().find(|c| c.category == name)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    pub(crate) fn finish(&mut self, outcome: Option<RunOutcome>) {
        self.finished_at = Utc::now();
        self.duration_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self.outcome = outcome.unwrap_or(if self.errors.is_empty() {
            RunOutcome::Completed
        } else {
            RunOutcome::CompletedWithErrors
        });
    }
}

impl Default for RunResult {
    fn default() -> Self {
        Self::new()
    }
}
