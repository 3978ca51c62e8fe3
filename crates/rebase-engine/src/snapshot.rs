//! Parameter snapshot and restore around a type change.
//!
//! Only user-writable values are captured: not read-only, and either shared
//! or document-local. Built-in parameters are left for the new type to
//! derive.

use rebase_document::{Document, DocumentRead, ElementId, Instance, ParamValue, StorageKind};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSnapshot {
    values: BTreeMap<String, ParamValue>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub skipped: usize,
}

impl ParameterSnapshot {
    pub fn capture(instance: &Instance) -> Self {
        let values = instance
            .parameters
            .iter()
            .filter(|p| !p.read_only && (p.is_shared() || p.id.is_document_local()))
            .filter_map(|p| p.value.clone().map(|v| (p.name.clone(), v)))
            .collect();
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<(StorageKind, &ParamValue)> {
        self.values.get(name).map(|v| (v.kind(), v))
    }

    /// Write every captured value back onto the (retyped) instance by name.
    /// Individual failures are logged at debug level and skipped.
    pub fn restore<D: Document + ?Sized>(&self, doc: &mut D, instance_id: ElementId) -> RestoreReport {
        let mut report = RestoreReport::default();
        let current = match doc.instance(instance_id) {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                tracing::debug!(instance = %instance_id, "instance gone, nothing restored");
                report.skipped = self.values.len();
                return report;
            }
            Err(err) => {
                tracing::debug!(instance = %instance_id, error = %err, "instance query failed");
                report.skipped = self.values.len();
                return report;
            }
        };

        for (name, value) in &self.values {
            let writable = current
                .parameter(name)
                .is_some_and(|p| !p.read_only);
            if !writable {
                report.skipped += 1;
                continue;
            }
            match doc.set_parameter(instance_id, name, value.clone()) {
                Ok(()) => report.restored += 1,
                Err(err) => {
                    tracing::debug!(
                        instance = %instance_id,
                        parameter = %name,
                        error = %err,
                        "parameter not restored"
                    );
                    report.skipped += 1;
                }
            }
        }
        report
    }
}
