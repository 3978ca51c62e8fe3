//! Pipeline orchestrator: one full migration run.
//!
//! ```text
//! ┌─────────────── plan (no transaction open) ───────────────┐
//! │ for each category: collect ─► reconcile ─► gateway (await) │
//! └───────────────────────────────┬───────────────────────────┘
//!                                 ▼
//!                 reconcile parameter definitions
//!                                 ▼
//! ┌──────────── mutate (synchronous, per category) ───────────┐
//! │ families first, then system types:                        │
//! │ SwitchEngine::run ─► Cleanup::run ─► CategoryReport        │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Every gateway call completes before the first transaction opens, so no
//! transaction ever spans an await. Cancellation is honored only at stage
//! boundaries.

use crate::bindings::reconcile_parameters;
use crate::catalog::{collect, filter_in_use, Catalog};
use crate::cleanup::Cleanup;
use crate::config::{CategoryDescriptor, RebaseConfig};
use crate::error::{RebaseError, Result};
use crate::mapping::MappingEntry;
use crate::progress::{CancellationToken, NoProgress, ProgressSink};
use crate::reconcile::{apply_ai_results, reconcile};
use crate::report::{CategoryReport, RunOutcome, RunResult};
use crate::switch::SwitchEngine;
use rebase_document::{Document, DocumentRead};
use rebase_llm::{DisabledGateway, MappingGateway, MappingRequest};
use std::sync::Arc;
use tracing::Instrument;

/// Everything decided about a category before any mutation.
struct CategoryPlan<'c> {
    descriptor: &'c CategoryDescriptor,
    old: Catalog,
    target: Catalog,
    entries: Vec<MappingEntry>,
    report: CategoryReport,
    /// False when the catalogs could not be collected
    ready: bool,
}

fn checkpoint(cancel: Option<&CancellationToken>) -> Result<()> {
    if cancel.is_some_and(CancellationToken::is_cancelled) {
        return Err(RebaseError::Cancelled);
    }
    Ok(())
}

pub struct RebasePipeline {
    config: RebaseConfig,
    gateway: Arc<dyn MappingGateway>,
}

impl RebasePipeline {
    pub fn new(config: RebaseConfig, gateway: Arc<dyn MappingGateway>) -> Self {
        Self { config, gateway }
    }

    /// A pipeline whose gateway never maps anything
    pub fn offline(config: RebaseConfig) -> Self {
        Self::new(config, Arc::new(DisabledGateway))
    }

    pub fn config(&self) -> &RebaseConfig {
        &self.config
    }

    /// Migrate `source` onto the catalog of `template`.
    ///
    /// Never fails: cancellation and fatal errors are reported through
    /// [`RunResult::outcome`], per-item failures through
    /// [`RunResult::errors`].
    pub async fn run_full_migration(
        &self,
        source: &mut dyn Document,
        template: &dyn DocumentRead,
        progress: Option<&dyn ProgressSink>,
        cancel: Option<&CancellationToken>,
    ) -> RunResult {
        let mut run = RunResult::new();
        let progress = progress.unwrap_or(&NoProgress);
        let span = tracing::info_span!("rebase_run", run_id = %run.run_id, source = source.title());

        tracing::info!(
            parent: &span,
            template = template.title(),
            categories = self.config.categories.len(),
            use_ai = self.config.use_ai,
            gateway = self.gateway.name(),
            "migration started"
        );

        let outcome = match self
            .execute(source, template, progress, cancel, &mut run)
            .instrument(span.clone())
            .await
        {
            Ok(()) => None,
            Err(RebaseError::Cancelled) => {
                tracing::warn!(parent: &span, "migration cancelled");
                Some(RunOutcome::Cancelled)
            }
            Err(err) => {
                tracing::error!(parent: &span, error = %err, "migration failed");
                run.errors.push(err.to_string());
                Some(RunOutcome::Failed(err.to_string()))
            }
        };
        if source.has_open_transaction() {
            if let Err(err) = source.rollback_transaction() {
                tracing::error!(parent: &span, error = %err, "rollback of dangling transaction failed");
            }
        }

        run.finish(outcome);
        progress.report("Done");
        tracing::info!(
            parent: &span,
            outcome = ?run.outcome,
            switched = run.switched_instances,
            renamed = run.renamed,
            deleted = run.deleted,
            errors = run.errors.len(),
            duration_ms = run.duration_ms,
            "migration finished"
        );
        run
    }

    async fn execute(
        &self,
        source: &mut dyn Document,
        template: &dyn DocumentRead,
        progress: &dyn ProgressSink,
        cancel: Option<&CancellationToken>,
        run: &mut RunResult,
    ) -> Result<()> {
        self.config.validate()?;
        let mode = self.config.failure_mode;

        let mut plans = Vec::new();
        for descriptor in self.config.ordered_categories() {
            checkpoint(cancel)?;
            progress.report(&format!("Reconciling {}", descriptor.category));
            plans.push(self.plan(&*source, template, descriptor).await?);
        }

        checkpoint(cancel)?;
        if self.config.parameters.enabled {
            progress.report("Reconciling parameter definitions");
            match reconcile_parameters(source, template, &self.config.parameters, mode) {
                Ok(sync) => {
                    run.parameters_added = sync.added.len();
                    run.parameters_removed = sync.removed.len();
                    run.errors
                        .extend(sync.errors.into_iter().map(|e| format!("[parameters] {e}")));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "parameter reconciliation failed");
                    run.errors.push(format!("[parameters] {err}"));
                }
            }
        }

        for plan in plans {
            let CategoryPlan {
                descriptor,
                old,
                target,
                mut entries,
                mut report,
                ready,
            } = plan;

            if ready {
                checkpoint(cancel)?;
                progress.report(&format!("Switching {}", descriptor.category));
                let suffix = descriptor.effective_suffix(&self.config.suffix);

                let switched = SwitchEngine::new(descriptor, suffix, mode, progress).run(
                    source,
                    template,
                    &old,
                    &target,
                    &mut entries,
                    &mut report,
                );
                let outcome = switched.and_then(|_| {
                    progress.report(&format!("Cleaning up {}", descriptor.category));
                    Cleanup::new(descriptor, suffix, mode).run(source, &old, &mut entries, &mut report)
                });
                match outcome {
                    Ok(()) => report.completed = true,
                    Err(err) => report.error(format!("category aborted: {err}")),
                }
            }

            tracing::info!(
                category = %report.category,
                entries = report.total_entries,
                exact = report.exact_matches,
                ai = report.ai_mapped,
                switched = report.switched_instances,
                renamed = report.renamed,
                deleted = report.deleted,
                errors = report.errors.len(),
                "category finished"
            );
            report.entries = entries;
            run.absorb(report);
        }
        Ok(())
    }

    /// Collect, reconcile and ask the gateway. Read-only on the document.
    async fn plan<'c>(
        &self,
        source: &dyn Document,
        template: &dyn DocumentRead,
        descriptor: &'c CategoryDescriptor,
    ) -> Result<CategoryPlan<'c>> {
        let mut report = CategoryReport::new(descriptor);
        let catalogs = collect(source, descriptor)
            .and_then(|old| Ok((old, collect(template, descriptor)?)));
        let (old, target) = match catalogs {
            Ok(catalogs) => catalogs,
            Err(err) => {
                report.error(format!("collecting catalogs: {err}"));
                return Ok(CategoryPlan {
                    descriptor,
                    old: Catalog::default(),
                    target: Catalog::default(),
                    entries: Vec::new(),
                    report,
                    ready: false,
                });
            }
        };
        let old = if self.config.filter_in_use {
            filter_in_use(source, &old)
        } else {
            old
        };

        let reconciliation = reconcile(&old, &target);
        report.total_entries = old.len();
        report.exact_matches = reconciliation.exact_matches.len();
        let mut entries = reconciliation.entries;

        if self.config.use_ai && !reconciliation.residual.is_empty() && !target.is_empty() {
            if source.has_open_transaction() {
                return Err(RebaseError::TransactionOpen);
            }
            let request = MappingRequest {
                schema: descriptor.kind.response_schema(),
                old: reconciliation.residual.iter().map(|e| e.summary()).collect(),
                new: target.summaries(),
            };
            match self.gateway.map_catalogs(&request).await {
                Ok(results) => {
                    let stats = apply_ai_results(&mut entries, &results, &old, &target);
                    tracing::info!(
                        category = %descriptor.category,
                        residual = request.old.len(),
                        mapped = stats.mapped,
                        no_match = stats.no_match,
                        unknown_target = stats.unknown_target,
                        ignored = stats.ignored,
                        "gateway results applied"
                    );
                    report.ai_mapped = stats.mapped;
                }
                Err(err) => report.error(format!("AI mapping via {}: {err}", self.gateway.name())),
            }
        }

        tracing::info!(
            category = %descriptor.category,
            entries = report.total_entries,
            exact = report.exact_matches,
            residual = reconciliation.residual.len(),
            "category planned"
        );
        Ok(CategoryPlan {
            descriptor,
            old,
            target,
            entries,
            report,
            ready: true,
        })
    }
}
