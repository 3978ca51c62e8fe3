use crate::ElementId;

/// Errors raised by host document primitives
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("element {0} not found")]
    NotFound(ElementId),
    #[error("no open transaction (required by {0})")]
    NoTransaction(&'static str),
    #[error("transaction '{0}' is already open")]
    TransactionAlreadyOpen(String),
    #[error("name '{name}' is already used by element {existing}")]
    DuplicateName { name: String, existing: ElementId },
    #[error("element {0} is not a top-level instance")]
    NotTopLevel(ElementId),
    #[error("category mismatch: element {element} is '{actual}', expected '{expected}'")]
    CategoryMismatch {
        element: ElementId,
        expected: String,
        actual: String,
    },
    #[error("parameter '{name}' on element {element} is read-only")]
    ReadOnly { element: ElementId, name: String },
    #[error("parameter '{name}' not found on element {element}")]
    ParameterNotFound { element: ElementId, name: String },
    #[error("parameter '{name}' stores {expected:?}, got {actual:?}")]
    StorageMismatch {
        name: String,
        expected: crate::StorageKind,
        actual: crate::StorageKind,
    },
    #[error("operation not permitted: {0}")]
    NotPermitted(String),
    #[error("host refused {0}")]
    Refused(String),
    #[error("unknown failure {0}")]
    UnknownFailure(u32),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
