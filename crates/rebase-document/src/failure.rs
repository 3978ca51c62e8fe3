//! Mid-transaction failure reporting.
//!
//! When a transaction commits, the host validates the document and collects
//! failures (warnings and errors). It then hands them to the transaction's
//! [`FailuresPreprocessor`] through a [`FailuresAccessor`] in rounds:
//!
//! ```text
//! commit ──► validate ──► failures? ──no──► Committed
//!                            │
//!                           yes
//!                            ▼
//!                   preprocessor.preprocess(accessor)
//!                            │
//!            ┌───────────────┼──────────────────┐
//!            ▼               ▼                  ▼
//!        dismissed       resolved           ProceedWithRollback
//!        (removed)   (fixed or retried)         │
//!            └───────► next round ◄──┘          ▼
//!                                           RolledBack
//! ```

use crate::{DocumentError, ElementId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one failure within a single commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FailureId(pub u32);

impl fmt::Display for FailureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSeverity {
    Warning,
    Error,
}

/// Automatic resolutions a host may offer for an error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    DeleteElements,
    DetachElements,
    UnjoinElements,
    ResetElements,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureMessage {
    pub id: FailureId,
    pub severity: FailureSeverity,
    pub description: String,
    pub elements: Vec<ElementId>,
}

/// Verdict returned from one preprocessing round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureProcessingResult {
    /// Let the host continue towards a commit
    Continue,
    /// Abandon the transaction; the host rolls everything back
    ProceedWithRollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Committed,
    RolledBack,
}

/// The host's view of pending failures during a commit.
pub trait FailuresAccessor {
    fn transaction_name(&self) -> &str;

    fn failures(&self) -> Vec<FailureMessage>;

    /// Admissible resolutions for a failure, in the host's preference order,
    /// excluding every kind already attempted for this failure.
    fn untried_resolutions(&self, id: FailureId) -> Result<Vec<ResolutionKind>, DocumentError>;

    fn resolve(&mut self, id: FailureId, kind: ResolutionKind) -> Result<(), DocumentError>;

    fn dismiss(&mut self, id: FailureId) -> Result<(), DocumentError>;
}

/// Interceptor installed per transaction.
pub trait FailuresPreprocessor {
    fn preprocess(&mut self, failures: &mut dyn FailuresAccessor) -> FailureProcessingResult;
}
