//! Commit-time failure policy.
//!
//! Permissive mode favors finishing a large batch over a pristine document:
//! warnings are dismissed, errors get the first resolution the host has not
//! tried yet, and only an error with nothing left to try rolls the
//! transaction back. Strict mode rolls back on any error.

use crate::config::FailureMode;
use rebase_document::{
    FailureMessage, FailureProcessingResult, FailureSeverity, FailuresAccessor,
    FailuresPreprocessor,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureStats {
    pub warnings_dismissed: usize,
    pub errors_resolved: usize,
    pub errors_unresolvable: usize,
}

#[derive(Debug, Clone)]
pub struct FailurePolicy {
    mode: FailureMode,
    stats: FailureStats,
}

impl FailurePolicy {
    pub fn new(mode: FailureMode) -> Self {
        Self {
            mode,
            stats: FailureStats::default(),
        }
    }

    pub fn permissive() -> Self {
        Self::new(FailureMode::Permissive)
    }

    pub fn strict() -> Self {
        Self::new(FailureMode::Strict)
    }

    pub fn stats(&self) -> FailureStats {
        self.stats
    }

    /// Returns false when the error could not be resolved.
    fn handle_error(&mut self, accessor: &mut dyn FailuresAccessor, failure: &FailureMessage) -> bool {
        let untried = match accessor.untried_resolutions(failure.id) {
            Ok(untried) => untried,
            Err(err) => {
                tracing::warn!(failure = %failure.id, error = %err, "resolution query failed");
                Vec::new()
            }
        };

        if let Some(&kind) = untried.first() {
            match accessor.resolve(failure.id, kind) {
                Ok(()) => {
                    tracing::info!(
                        transaction = accessor.transaction_name(),
                        failure = %failure.id,
                        resolution = ?kind,
                        "resolving error"
                    );
                    self.stats.errors_resolved += 1;
                    return true;
                }
                Err(err) => {
                    tracing::warn!(failure = %failure.id, resolution = ?kind, error = %err, "resolution rejected");
                }
            }
        }

        tracing::warn!(
            transaction = accessor.transaction_name(),
            failure = %failure.id,
            description = %failure.description,
            "unresolvable error, dismissing"
        );
        if let Err(err) = accessor.dismiss(failure.id) {
            tracing::warn!(failure = %failure.id, error = %err, "dismiss failed");
        }
        self.stats.errors_unresolvable += 1;
        false
    }
}

impl FailuresPreprocessor for FailurePolicy {
    fn preprocess(&mut self, accessor: &mut dyn FailuresAccessor) -> FailureProcessingResult {
        let mut unresolvable = false;

        for failure in accessor.failures() {
            match failure.severity {
                FailureSeverity::Warning => {
                    tracing::warn!(
                        transaction = accessor.transaction_name(),
                        description = %failure.description,
                        elements = failure.elements.len(),
                        "dismissing warning"
                    );
                    match accessor.dismiss(failure.id) {
                        Ok(()) => self.stats.warnings_dismissed += 1,
                        Err(err) => tracing::warn!(failure = %failure.id, error = %err, "dismiss failed"),
                    }
                }
                FailureSeverity::Error if self.mode == FailureMode::Strict => {
                    tracing::warn!(
                        transaction = accessor.transaction_name(),
                        description = %failure.description,
                        "error under strict mode, rolling back"
                    );
                    self.stats.errors_unresolvable += 1;
                    return FailureProcessingResult::ProceedWithRollback;
                }
                FailureSeverity::Error => {
                    if !self.handle_error(accessor, &failure) {
                        unresolvable = true;
                    }
                }
            }
        }

        if unresolvable {
            FailureProcessingResult::ProceedWithRollback
        } else {
            FailureProcessingResult::Continue
        }
    }
}
