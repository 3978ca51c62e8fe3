//! Rebase Document: the host document as seen by the rebase engine
//!
//! The engine never touches a CAD host directly. Everything it needs is
//! expressed as two traits:
//!
//! - [`DocumentRead`]: query primitives (families, types, instances, groups,
//!   parameter bindings). Used for both the project being migrated and the
//!   read-only template project.
//! - [`Document`]: transactions plus mutation primitives (rename, copy between
//!   documents, bulk type change, delete, ungroup, parameter writes).
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │   template (read-only)   │──copy─►│   project (Document)     │
//! │   impl DocumentRead      │        │   begin ─► mutate ─►     │
//! └──────────────────────────┘        │   commit(preprocessor)   │
//!                                     └──────────────────────────┘
//! ```
//!
//! [`MemoryDocument`] is a complete in-process host used by the CLI (JSON
//! snapshots) and by tests.

pub mod error;
pub mod failure;
pub mod memory;
pub mod model;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

pub use error::DocumentError;
pub use failure::{
    FailureId, FailureMessage, FailureProcessingResult, FailureSeverity, FailuresAccessor,
    FailuresPreprocessor, ResolutionKind, TransactionStatus,
};
pub use memory::{Fault, FailureRule, MemoryDocument};
pub use model::{
    DuplicateNamePolicy, ElementId, ElementType, Family, FamilyKind, Group, Instance,
    ParamValue, Parameter, ParameterBinding, Placement, StorageKind,
};

// ============================================================================
// Query primitives
// ============================================================================

/// Read access to a host document.
///
/// Every query is fallible: a live host may refuse a query (for example while
/// regenerating), and callers decide how to degrade.
pub trait DocumentRead {
    fn title(&self) -> &str;

    fn families(&self, category: &str) -> Result<Vec<Family>, DocumentError>;

    fn family(&self, id: ElementId) -> Result<Option<Family>, DocumentError>;

    /// All element types of a category, across every family
    fn element_types(&self, category: &str) -> Result<Vec<ElementType>, DocumentError>;

    fn element_type(&self, id: ElementId) -> Result<Option<ElementType>, DocumentError>;

    /// All placed instances of a category, whatever their placement
    fn instances(&self, category: &str) -> Result<Vec<Instance>, DocumentError>;

    fn instances_of_type(&self, type_id: ElementId) -> Result<Vec<Instance>, DocumentError>;

    fn instance(&self, id: ElementId) -> Result<Option<Instance>, DocumentError>;

    /// Every placed instance in the document
    fn all_instances(&self) -> Result<Vec<Instance>, DocumentError>;

    fn groups(&self) -> Result<Vec<Group>, DocumentError>;

    fn parameter_bindings(&self) -> Result<Vec<ParameterBinding>, DocumentError>;
}

// ============================================================================
// Mutation primitives
// ============================================================================

/// Mutable access to a host document.
///
/// All mutations require an open transaction. A document has at most one open
/// transaction at a time.
pub trait Document: DocumentRead {
    fn begin_transaction(&mut self, name: &str) -> Result<(), DocumentError>;

    /// Validate and commit, driving `preprocessor` through any failures the
    /// host reports. Returns `RolledBack` when the failures could not be
    /// cleared; the document is then exactly as it was at `begin_transaction`.
    fn commit_transaction(
        &mut self,
        preprocessor: &mut dyn FailuresPreprocessor,
    ) -> Result<TransactionStatus, DocumentError>;

    fn rollback_transaction(&mut self) -> Result<(), DocumentError>;

    fn has_open_transaction(&self) -> bool;

    fn rename_family(&mut self, id: ElementId, new_name: &str) -> Result<(), DocumentError>;

    fn rename_type(&mut self, id: ElementId, new_name: &str) -> Result<(), DocumentError>;

    /// Copy families (with all their types) or individual types from another
    /// document. Returns `source id -> destination id` for every copied
    /// family and type.
    fn copy_from(
        &mut self,
        source: &dyn DocumentRead,
        ids: &[ElementId],
        policy: DuplicateNamePolicy,
    ) -> Result<BTreeMap<ElementId, ElementId>, DocumentError>;

    /// Re-point every instance in `instance_ids` at `new_type` in one host call.
    /// All instances must be top-level and of the new type's category.
    fn change_type_bulk(
        &mut self,
        instance_ids: &[ElementId],
        new_type: ElementId,
    ) -> Result<(), DocumentError>;

    /// Delete elements. Deleting a family deletes its types; deleting a type
    /// deletes its instances. Returns every deleted id.
    fn delete(&mut self, ids: &[ElementId]) -> Result<Vec<ElementId>, DocumentError>;

    /// Dissolve a group, promoting its members to top-level placement
    fn ungroup(&mut self, group_id: ElementId) -> Result<Vec<ElementId>, DocumentError>;

    fn set_parameter(
        &mut self,
        element: ElementId,
        name: &str,
        value: ParamValue,
    ) -> Result<(), DocumentError>;

    fn add_parameter_binding(&mut self, binding: ParameterBinding)
        -> Result<ElementId, DocumentError>;

    fn remove_parameter_binding(&mut self, name: &str) -> Result<(), DocumentError>;
}
