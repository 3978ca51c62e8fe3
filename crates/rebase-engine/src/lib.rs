//! Rebase Engine: migrate a project onto a template's catalog
//!
//! A project accumulates families and system types whose names drift away
//! from the office template. The engine brings it back in line without
//! losing placed instances or their user data:
//!
//! ```text
//!  project catalog ──┐
//!                    ├──► reconcile (exact names) ──► gateway (residual) ──┐
//!  template catalog ─┘                                                    │
//!                                                                         ▼
//!  rename conflicts ─► copy template entries ─► identifier map ─► bulk switch
//!                                                                         │
//!                      purge ◄── retire unresolved ◄── retire superseded ◄┘
//! ```
//!
//! - [`catalog`]: name-keyed view of one category of a document
//! - [`reconcile`]: exact matching and folding in gateway results
//! - [`id_map`]: old type id to new type id, built from names
//! - [`switch`]: per-category instance switch with parameter preservation
//! - [`cleanup`]: rename or delete what the switch left behind
//! - [`pipeline`]: the whole run, across categories, with cancellation
//!
//! All document access goes through `rebase_document`, so the engine runs
//! unchanged against an in-memory document or a live host.

pub mod bindings;
pub mod catalog;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod failure;
pub mod id_map;
pub mod mapping;
pub mod naming;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod report;
pub mod snapshot;
pub mod switch;
pub mod transaction;

pub use bindings::{reconcile_parameters, ParameterSyncReport};
pub use catalog::{collect, filter_in_use, Catalog, CatalogEntry, SubEntry};
pub use cleanup::Cleanup;
pub use config::{
    CatalogKind, CategoryDescriptor, FailureMode, ParameterSyncConfig, RebaseConfig,
    DEFAULT_SUFFIX,
};
pub use error::{RebaseError, Result};
pub use failure::{FailurePolicy, FailureStats};
pub use id_map::{build_id_map, IdMapStats, IdentifierMap};
pub use mapping::{MappingEntry, MappingSource, MappingStatus, SubEntryMapping, SubStatus};
pub use pipeline::RebasePipeline;
pub use progress::{CancellationToken, NoProgress, ProgressSink};
pub use reconcile::{apply_ai_results, map_sub_entries, reconcile, AiApplyStats, Reconciliation};
pub use report::{CategoryReport, RunOutcome, RunResult};
pub use snapshot::{ParameterSnapshot, RestoreReport};
pub use switch::SwitchEngine;
pub use transaction::with_transaction;
