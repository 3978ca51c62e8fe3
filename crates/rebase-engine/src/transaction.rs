//! Guarded transactions: begin, run, commit through the failure policy.

use crate::config::FailureMode;
use crate::error::{RebaseError, Result};
use crate::failure::FailurePolicy;
use rebase_document::{Document, TransactionStatus};

/// Run `body` inside a transaction named `name`.
///
/// An error from `body` rolls the transaction back and is returned as is. A
/// commit the failure policy could not clear comes back as
/// [`RebaseError::RolledBack`]. Either way the document is left without an
/// open transaction.
pub fn with_transaction<D, T, F>(doc: &mut D, name: &str, mode: FailureMode, body: F) -> Result<T>
where
    D: Document + ?Sized,
    F: FnOnce(&mut D) -> Result<T>,
{
    doc.begin_transaction(name)?;

    let value = match body(doc) {
        Ok(value) => value,
        Err(err) => {
            if let Err(rollback_err) = doc.rollback_transaction() {
                tracing::error!(transaction = name, error = %rollback_err, "rollback failed");
            }
            return Err(err);
        }
    };

    let mut policy = FailurePolicy::new(mode);
    let status = match doc.commit_transaction(&mut policy) {
        Ok(status) => status,
        Err(err) => {
            if doc.has_open_transaction() {
                if let Err(rollback_err) = doc.rollback_transaction() {
                    tracing::error!(transaction = name, error = %rollback_err, "rollback failed");
                }
            }
            return Err(err.into());
        }
    };

    let stats = policy.stats();
    match status {
        TransactionStatus::Committed => {
            tracing::debug!(
                transaction = name,
                warnings_dismissed = stats.warnings_dismissed,
                errors_resolved = stats.errors_resolved,
                "committed"
            );
            Ok(value)
        }
        TransactionStatus::RolledBack => {
            tracing::warn!(
                transaction = name,
                errors_unresolvable = stats.errors_unresolvable,
                "rolled back at commit"
            );
            Err(RebaseError::RolledBack(name.to_string()))
        }
    }
}
