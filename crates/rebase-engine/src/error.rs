use crate::mapping::MappingStatus;
use rebase_document::DocumentError;
use rebase_llm::LLMError;

#[derive(Debug, thiserror::Error)]
pub enum RebaseError {
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Mapping gateway error: {0}")]
    Gateway(#[from] LLMError),

    #[error("Transaction '{0}' was rolled back")]
    RolledBack(String),

    #[error("A document transaction is open before a gateway call")]
    TransactionOpen,

    #[error("Invalid status change for '{entry}': {from:?} -> {to:?}")]
    InvalidTransition {
        entry: String,
        from: MappingStatus,
        to: MappingStatus,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, RebaseError>;
