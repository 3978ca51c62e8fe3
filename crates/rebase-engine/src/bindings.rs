//! Project parameter definitions: bring the source in line with the template.
//!
//! Missing template definitions are added. Source-only definitions are
//! removed only when no element carries a value for them; the scan covers
//! every placed instance, so a definition in use anywhere survives.

use crate::config::{FailureMode, ParameterSyncConfig};
use crate::error::Result;
use crate::transaction::with_transaction;
use rebase_document::{Document, DocumentRead, ElementId, ParameterBinding};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSyncReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Source-only definitions left in place because elements use them
    pub kept_in_use: Vec<String>,
    pub errors: Vec<String>,
}

/// Names of definitions with at least one meaningful value on any instance.
fn names_in_use<D: DocumentRead + ?Sized>(doc: &D) -> Result<BTreeSet<String>> {
    let mut used = BTreeSet::new();
    for instance in doc.all_instances()? {
        for parameter in &instance.parameters {
            if parameter.value.as_ref().is_some_and(|v| v.is_meaningful()) {
                used.insert(parameter.name.clone());
            }
        }
    }
    Ok(used)
}

pub fn reconcile_parameters(
    doc: &mut dyn Document,
    template: &dyn DocumentRead,
    config: &ParameterSyncConfig,
    mode: FailureMode,
) -> Result<ParameterSyncReport> {
    let mut report = ParameterSyncReport::default();
    if !config.enabled {
        return Ok(report);
    }

    let template_bindings = template.parameter_bindings()?;
    let source_bindings = doc.parameter_bindings()?;
    let template_names: BTreeSet<&str> = template_bindings.iter().map(|b| b.name.as_str()).collect();
    let source_names: BTreeSet<&str> = source_bindings.iter().map(|b| b.name.as_str()).collect();

    let to_add: Vec<ParameterBinding> = template_bindings
        .iter()
        .filter(|b| !source_names.contains(b.name.as_str()))
        .map(|b| ParameterBinding {
            id: ElementId::INVALID,
            ..b.clone()
        })
        .collect();

    let mut to_remove = Vec::new();
    if config.remove_unused {
        let in_use = names_in_use(&*doc)?;
        for binding in source_bindings
            .iter()
            .filter(|b| !template_names.contains(b.name.as_str()))
        {
            if in_use.contains(&binding.name) {
                tracing::info!(parameter = %binding.name, "not in template but in use, kept");
                report.kept_in_use.push(binding.name.clone());
            } else {
                to_remove.push(binding.name.clone());
            }
        }
    }

    if to_add.is_empty() && to_remove.is_empty() {
        return Ok(report);
    }

    let mut errors = Vec::new();
    let outcome = with_transaction(doc, "Reconcile parameter definitions", mode, |d| {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        for binding in &to_add {
            match d.add_parameter_binding(binding.clone()) {
                Ok(id) => {
                    tracing::debug!(parameter = %binding.name, id = %id, "definition added");
                    added.push(binding.name.clone());
                }
                Err(err) => errors.push(format!("add parameter '{}' failed: {err}", binding.name)),
            }
        }
        for name in &to_remove {
            match d.remove_parameter_binding(name) {
                Ok(()) => {
                    tracing::debug!(parameter = %name, "definition removed");
                    removed.push(name.clone());
                }
                Err(err) => errors.push(format!("remove parameter '{name}' failed: {err}")),
            }
        }
        Ok((added, removed))
    });

    report.errors = errors;
    match outcome {
        Ok((added, removed)) => {
            tracing::info!(
                added = added.len(),
                removed = removed.len(),
                kept_in_use = report.kept_in_use.len(),
                "parameter definitions reconciled"
            );
            report.added = added;
            report.removed = removed;
        }
        Err(err) => report.errors.push(format!("parameter reconciliation: {err}")),
    }
    Ok(report)
}
