//! Instance switch engine: one pass over one category.
//!
//! ```text
//! rename conflicts ──► load template entries ──► build id map
//!        │                                            │
//!        ▼                                            ▼
//!   (1 transaction)                       locate ──► ungroup? ──► switch per type
//!                                                                 (1 transaction each)
//!                                                                        │
//!                                                      mark statuses ◄───┘
//! ```
//!
//! Every per-item failure is recorded on the [`CategoryReport`] and the pass
//! moves on. An `Err` from [`SwitchEngine::run`] means the pass could not
//! continue at all (for example the document refused a query).

use crate::catalog::{collect, Catalog, CatalogEntry};
use crate::config::{CategoryDescriptor, FailureMode};
use crate::error::Result;
use crate::id_map::{build_id_map, IdentifierMap};
use crate::mapping::{MappingEntry, MappingStatus};
use crate::naming::{existing_names, rename_unit, suffixed_name};
use crate::progress::ProgressSink;
use crate::report::CategoryReport;
use crate::snapshot::{ParameterSnapshot, RestoreReport};
use crate::transaction::with_transaction;
use rebase_document::{Document, DocumentRead, DuplicateNamePolicy, ElementId, Placement};
use std::collections::{BTreeMap, BTreeSet};

/// Instances of the category whose current type is mapped.
#[derive(Debug, Default)]
struct Candidates {
    /// `old type -> top-level instances`
    top_level: BTreeMap<ElementId, Vec<ElementId>>,
    /// `group -> member candidates`
    grouped: BTreeMap<ElementId, usize>,
    nested: usize,
}

impl Candidates {
    fn grouped_total(&self) -> usize {
        self.grouped.values().sum()
    }
}

pub struct SwitchEngine<'a> {
    descriptor: &'a CategoryDescriptor,
    suffix: &'a str,
    mode: FailureMode,
    progress: &'a dyn ProgressSink,
}

impl<'a> SwitchEngine<'a> {
    pub fn new(
        descriptor: &'a CategoryDescriptor,
        suffix: &'a str,
        mode: FailureMode,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            descriptor,
            suffix,
            mode,
            progress,
        }
    }

    /// Switch every mapped instance of the category onto its template type.
    ///
    /// `old` is the source catalog as reconciled (before any rename);
    /// `target` is the template catalog. Resolved entries end up `Processed`
    /// or `Failed`. Returns the identifier map that was applied.
    pub fn run(
        &self,
        doc: &mut dyn Document,
        template: &dyn DocumentRead,
        old: &Catalog,
        target: &Catalog,
        entries: &mut [MappingEntry],
        report: &mut CategoryReport,
    ) -> Result<IdentifierMap> {
        self.rename_conflicts(doc, entries, report)?;
        let loaded = self.load_targets(doc, template, target, entries, report);

        let new_catalog = collect(&*doc, self.descriptor)?;
        let results: Vec<_> = entries
            .iter()
            .filter(|e| e.target_name.as_ref().is_some_and(|t| loaded.contains(t)))
            .filter_map(MappingEntry::to_mapping_result)
            .collect();
        let (id_map, stats) = build_id_map(old, &new_catalog, &results);
        report.id_map = stats;
        tracing::info!(
            category = %self.descriptor.category,
            pairs = stats.pairs,
            missing_old = stats.missing_old,
            missing_new = stats.missing_new,
            skipped_pairs = stats.skipped_pairs,
            "identifier map built"
        );

        let mut candidates = self.locate(&*doc, &id_map)?;
        if self.descriptor.ungroup && !candidates.grouped.is_empty() {
            self.ungroup(doc, &candidates, report);
            candidates = self.locate(&*doc, &id_map)?;
        }
        report.skipped_nested = candidates.nested;
        report.skipped_grouped = candidates.grouped_total();
        if candidates.nested > 0 {
            tracing::info!(
                category = %self.descriptor.category,
                nested = candidates.nested,
                "nested instances left to their host"
            );
        }
        if report.skipped_grouped > 0 {
            tracing::warn!(
                category = %self.descriptor.category,
                grouped = report.skipped_grouped,
                "grouped instances left on their old types"
            );
        }

        let failed_types = self.switch_partitions(doc, &id_map, &candidates, report);
        self.mark_statuses(old, &loaded, &failed_types, entries, report);
        Ok(id_map)
    }

    // ========================================================================
    // Stages
    // ========================================================================

    /// Move every live entry named like an incoming template entry out of
    /// the way.
    fn rename_conflicts(
        &self,
        doc: &mut dyn Document,
        entries: &[MappingEntry],
        report: &mut CategoryReport,
    ) -> Result<()> {
        let incoming: BTreeSet<String> = entries
            .iter()
            .filter(|e| e.is_resolved())
            .filter_map(|e| e.target_name.clone())
            .collect();
        let live = collect(&*doc, self.descriptor)?;
        let conflicts: Vec<CatalogEntry> = live
            .entries()
            .filter(|e| incoming.contains(&e.name))
            .cloned()
            .collect();
        if conflicts.is_empty() {
            return Ok(());
        }

        let mut taken = existing_names(&*doc, self.descriptor)?;
        taken.extend(incoming.iter().cloned());

        let kind = self.descriptor.kind;
        let suffix = self.suffix;
        let mut failures = Vec::new();
        let outcome = with_transaction(doc, "Rename conflicting entries", self.mode, |d| {
            let mut renamed = 0;
            for entry in &conflicts {
                let new_name = suffixed_name(&entry.name, suffix, &taken);
                match rename_unit(d, kind, entry.id, &new_name) {
                    Ok(()) => {
                        tracing::debug!(from = %entry.name, to = %new_name, "renamed");
                        taken.insert(new_name);
                        renamed += 1;
                    }
                    Err(err) => failures.push(format!("rename '{}' failed: {err}", entry.name)),
                }
            }
            Ok(renamed)
        });

        for failure in failures {
            report.error(failure);
        }
        match outcome {
            Ok(renamed) => report.renamed += renamed,
            Err(err) => report.error(format!("renaming conflicts: {err}")),
        }
        Ok(())
    }

    /// Copy every template entry a resolved mapping points at. Returns the
    /// names that made it into the document.
    fn load_targets(
        &self,
        doc: &mut dyn Document,
        template: &dyn DocumentRead,
        target: &Catalog,
        entries: &[MappingEntry],
        report: &mut CategoryReport,
    ) -> BTreeSet<String> {
        let needed: BTreeSet<&str> = entries
            .iter()
            .filter(|e| e.is_resolved())
            .filter_map(|e| e.target_name.as_deref())
            .collect();
        if needed.is_empty() {
            return BTreeSet::new();
        }

        let total = needed.len();
        let progress = self.progress;
        let mut failures = Vec::new();
        let outcome = with_transaction(doc, "Load template entries", self.mode, |d| {
            let mut loaded = BTreeSet::new();
            for (i, name) in needed.iter().enumerate() {
                progress.report(&format!("Loading template entry {}/{total}: {name}", i + 1));
                let Some(entry) = target.entry(name) else {
                    failures.push(format!("template entry '{name}' not found"));
                    continue;
                };
                match d.copy_from(template, &[entry.id], DuplicateNamePolicy::UseDestination) {
                    Ok(copied) => {
                        tracing::debug!(entry = %name, elements = copied.len(), "copied");
                        loaded.insert(name.to_string());
                    }
                    Err(err) => failures.push(format!("copy '{name}' failed: {err}")),
                }
            }
            Ok(loaded)
        });

        for failure in failures {
            report.error(failure);
        }
        match outcome {
            Ok(loaded) => loaded,
            Err(err) => {
                report.error(format!("loading template entries: {err}"));
                BTreeSet::new()
            }
        }
    }

    fn locate<D: DocumentRead + ?Sized>(&self, doc: &D, id_map: &IdentifierMap) -> Result<Candidates> {
        let mut candidates = Candidates::default();
        for instance in doc.instances(&self.descriptor.category)? {
            match id_map.get(instance.type_id) {
                Some(new_type) if new_type != instance.type_id => {}
                _ => continue,
            }
            match instance.placement {
                Placement::TopLevel => candidates
                    .top_level
                    .entry(instance.type_id)
                    .or_default()
                    .push(instance.id),
                Placement::InGroup(group) => *candidates.grouped.entry(group).or_default() += 1,
                Placement::Nested(_) => candidates.nested += 1,
            }
        }
        Ok(candidates)
    }

    fn ungroup(&self, doc: &mut dyn Document, candidates: &Candidates, report: &mut CategoryReport) {
        let groups: Vec<ElementId> = candidates.grouped.keys().copied().collect();
        let mut failures = Vec::new();
        let outcome = with_transaction(doc, "Ungroup candidates", self.mode, |d| {
            let mut dissolved = 0;
            for &group in &groups {
                match d.ungroup(group) {
                    Ok(members) => {
                        tracing::debug!(group = %group, members = members.len(), "ungrouped");
                        dissolved += 1;
                    }
                    Err(err) => failures.push(format!("ungroup {group} failed: {err}")),
                }
            }
            Ok(dissolved)
        });

        for failure in failures {
            report.error(failure);
        }
        match outcome {
            Ok(dissolved) => tracing::info!(
                category = %self.descriptor.category,
                groups = dissolved,
                "groups dissolved"
            ),
            Err(err) => report.error(format!("ungrouping: {err}")),
        }
    }

    /// Bulk-switch each type partition in its own transaction. Returns the
    /// old types whose partition failed.
    fn switch_partitions(
        &self,
        doc: &mut dyn Document,
        id_map: &IdentifierMap,
        candidates: &Candidates,
        report: &mut CategoryReport,
    ) -> BTreeSet<ElementId> {
        let mut failed = BTreeSet::new();
        let total = candidates.top_level.len();

        for (i, (&old_type, instances)) in candidates.top_level.iter().enumerate() {
            let Some(new_type) = id_map.get(old_type) else {
                continue;
            };
            self.progress.report(&format!(
                "Switching {} ({}/{total}): {} instances",
                self.descriptor.category,
                i + 1,
                instances.len()
            ));

            let name = format!("Switch type {old_type} -> {new_type}");
            let outcome = with_transaction(doc, &name, self.mode, |d| {
                let mut snapshots = Vec::with_capacity(instances.len());
                for &id in instances {
                    if let Some(instance) = d.instance(id)? {
                        snapshots.push((id, ParameterSnapshot::capture(&instance)));
                    }
                }

                d.change_type_bulk(instances, new_type)?;

                let mut restored = RestoreReport::default();
                for (id, snapshot) in &snapshots {
                    let r = snapshot.restore(d, *id);
                    restored.restored += r.restored;
                    restored.skipped += r.skipped;
                }
                Ok(restored)
            });

            match outcome {
                Ok(restored) => {
                    tracing::info!(
                        old_type = %old_type,
                        new_type = %new_type,
                        instances = instances.len(),
                        restored = restored.restored,
                        skipped = restored.skipped,
                        "partition switched"
                    );
                    report.switched_instances += instances.len();
                }
                Err(err) => {
                    report.error(format!("switching type {old_type} to {new_type}: {err}"));
                    failed.insert(old_type);
                }
            }
        }
        failed
    }

    fn mark_statuses(
        &self,
        old: &Catalog,
        loaded: &BTreeSet<String>,
        failed_types: &BTreeSet<ElementId>,
        entries: &mut [MappingEntry],
        report: &mut CategoryReport,
    ) {
        for entry in entries.iter_mut() {
            if !matches!(entry.status, MappingStatus::ExactMatch | MappingStatus::AiMapped) {
                continue;
            }
            let target_loaded = entry
                .target_name
                .as_ref()
                .is_some_and(|t| loaded.contains(t));

            let partition_failed = old.entry(&entry.source_name).is_some_and(|source| {
                entry
                    .mapped_subs()
                    .filter_map(|(sub, _)| source.sub(sub))
                    .any(|sub| failed_types.contains(&sub.id))
            });

            let next = if target_loaded && !partition_failed {
                MappingStatus::Processed
            } else {
                MappingStatus::Failed
            };
            if let Err(err) = entry.advance(next) {
                report.error(err.to_string());
            }
        }
    }
}
