//! Retiring superseded and unresolved entries after a switch pass.
//!
//! ```text
//! AI-mapped + Processed ──► no instances left? delete : rename with suffix
//! Pending               ──► instances?         ToRename : ToDelete
//! suffixed leftovers    ──► no instances left? delete
//! ```
//!
//! Entries with live instances are never deleted. Exact-match entries were
//! already moved aside before the copy, so the purge picks them up.

use crate::catalog::Catalog;
use crate::config::{CategoryDescriptor, FailureMode};
use crate::error::Result;
use crate::mapping::{MappingEntry, MappingSource, MappingStatus};
use crate::naming::{existing_names, is_suffixed, live_instance_count, live_units, rename_unit, suffixed_name};
use crate::report::CategoryReport;
use crate::transaction::with_transaction;
use rebase_document::{Document, ElementId};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Rename,
    Delete,
}

#[derive(Debug)]
struct Planned {
    /// Index into the mapping entries
    index: usize,
    name: String,
    id: ElementId,
    action: Action,
}

#[derive(Debug, Default)]
struct Applied {
    renamed: usize,
    deleted: usize,
    /// `index -> succeeded`
    outcomes: Vec<(usize, bool)>,
}

pub struct Cleanup<'a> {
    descriptor: &'a CategoryDescriptor,
    suffix: &'a str,
    mode: FailureMode,
}

impl<'a> Cleanup<'a> {
    pub fn new(descriptor: &'a CategoryDescriptor, suffix: &'a str, mode: FailureMode) -> Self {
        Self {
            descriptor,
            suffix,
            mode,
        }
    }

    pub fn run(
        &self,
        doc: &mut dyn Document,
        old: &Catalog,
        entries: &mut [MappingEntry],
        report: &mut CategoryReport,
    ) -> Result<()> {
        self.retire_superseded(doc, old, entries, report)?;
        self.retire_unresolved(doc, old, entries, report)?;
        self.purge(doc, report)
    }

    /// Old definitions of AI-mapped entries whose instances were switched.
    fn retire_superseded(
        &self,
        doc: &mut dyn Document,
        old: &Catalog,
        entries: &[MappingEntry],
        report: &mut CategoryReport,
    ) -> Result<()> {
        let mut planned = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            if entry.status != MappingStatus::Processed || entry.source != MappingSource::Ai {
                continue;
            }
            let Some(source) = old.entry(&entry.source_name) else {
                continue;
            };
            let action = if live_instance_count(&*doc, self.descriptor, source.id)? == 0 {
                Action::Delete
            } else {
                Action::Rename
            };
            planned.push(Planned {
                index,
                name: source.name.clone(),
                id: source.id,
                action,
            });
        }
        if planned.is_empty() {
            return Ok(());
        }

        let mut failures = Vec::new();
        match self.apply(doc, "Retire superseded entries", &planned, &mut failures) {
            Ok(applied) => {
                report.renamed += applied.renamed;
                report.deleted += applied.deleted;
            }
            Err(err) => report.error(format!("retiring superseded entries: {err}")),
        }
        for failure in failures {
            report.error(failure);
        }
        Ok(())
    }

    /// Entries that never resolved to a target.
    fn retire_unresolved(
        &self,
        doc: &mut dyn Document,
        old: &Catalog,
        entries: &mut [MappingEntry],
        report: &mut CategoryReport,
    ) -> Result<()> {
        let mut planned = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            if entry.status != MappingStatus::Pending {
                continue;
            }
            let Some(source) = old.entry(&entry.source_name) else {
                continue;
            };
            let action = if live_instance_count(&*doc, self.descriptor, source.id)? > 0 {
                Action::Rename
            } else {
                Action::Delete
            };
            planned.push(Planned {
                index,
                name: source.name.clone(),
                id: source.id,
                action,
            });
        }
        if planned.is_empty() {
            return Ok(());
        }

        let mut failures = Vec::new();
        match self.apply(doc, "Retire unresolved entries", &planned, &mut failures) {
            Ok(applied) => {
                report.renamed += applied.renamed;
                report.deleted += applied.deleted;
                for (index, succeeded) in applied.outcomes {
                    let action = planned
                        .iter()
                        .find(|p| p.index == index)
                        .map(|p| p.action);
                    let next = match (succeeded, action) {
                        (true, Some(Action::Rename)) => MappingStatus::ToRename,
                        (true, Some(Action::Delete)) => MappingStatus::ToDelete,
                        _ => MappingStatus::Failed,
                    };
                    if let Err(err) = entries[index].advance(next) {
                        report.error(err.to_string());
                    }
                }
            }
            Err(err) => {
                report.error(format!("retiring unresolved entries: {err}"));
                for p in &planned {
                    if let Err(err) = entries[p.index].advance(MappingStatus::Failed) {
                        report.error(err.to_string());
                    }
                }
            }
        }
        for failure in failures {
            report.error(failure);
        }
        Ok(())
    }

    /// Delete suffixed units that no instance references any more.
    fn purge(&self, doc: &mut dyn Document, report: &mut CategoryReport) -> Result<()> {
        let mut orphans = Vec::new();
        for (id, name) in live_units(&*doc, self.descriptor)? {
            if is_suffixed(&name, self.suffix) && live_instance_count(&*doc, self.descriptor, id)? == 0 {
                orphans.push((id, name));
            }
        }
        if orphans.is_empty() {
            return Ok(());
        }

        let mut failures = Vec::new();
        let outcome = with_transaction(doc, "Purge superseded entries", self.mode, |d| {
            let mut deleted = 0;
            for (id, name) in &orphans {
                match d.delete(&[*id]) {
                    Ok(_) => {
                        tracing::debug!(entry = %name, "purged");
                        deleted += 1;
                    }
                    Err(err) => failures.push(format!("purge '{name}' failed: {err}")),
                }
            }
            Ok(deleted)
        });
        for failure in failures {
            report.error(failure);
        }
        match outcome {
            Ok(deleted) => {
                tracing::info!(category = %self.descriptor.category, deleted, "purged leftovers");
                report.deleted += deleted;
            }
            Err(err) => report.error(format!("purging leftovers: {err}")),
        }
        Ok(())
    }

    fn apply(
        &self,
        doc: &mut dyn Document,
        name: &str,
        planned: &[Planned],
        failures: &mut Vec<String>,
    ) -> Result<Applied> {
        let mut taken: BTreeSet<String> = existing_names(&*doc, self.descriptor)?;
        let kind = self.descriptor.kind;
        let suffix = self.suffix;

        with_transaction(doc, name, self.mode, |d| {
            let mut applied = Applied::default();
            for p in planned {
                let outcome = match p.action {
                    Action::Rename => {
                        let new_name = suffixed_name(&p.name, suffix, &taken);
                        rename_unit(d, kind, p.id, &new_name).map(|()| {
                            tracing::debug!(from = %p.name, to = %new_name, "renamed");
                            taken.insert(new_name);
                            applied.renamed += 1;
                        })
                    }
                    Action::Delete => d.delete(&[p.id]).map(|_| {
                        tracing::debug!(entry = %p.name, "deleted");
                        applied.deleted += 1;
                    }),
                };
                if let Err(err) = &outcome {
                    let verb = match p.action {
                        Action::Rename => "rename",
                        Action::Delete => "delete",
                    };
                    failures.push(format!("{verb} '{}' failed: {err}", p.name));
                }
                applied.outcomes.push((p.index, outcome.is_ok()));
            }
            Ok(applied)
        })
    }
}
