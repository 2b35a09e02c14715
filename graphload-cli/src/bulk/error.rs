use thiserror::Error;

use crate::storage::StorageError;

/// Error when a cycle is detected in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circular dependency detected involving: {}", entities.join(", "))]
pub struct CycleError {
    pub entities: Vec<String>,
}

/// Fatal errors raised by bulk operations
///
/// Everything except `Storage` is raised before any chunk is dispatched.
#[derive(Debug, Error)]
pub enum BulkError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown entity type '{0}'")]
    UnknownEntity(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Why a single chunk did not commit
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("chunk rejected: {0}")]
    Rejected(String),

    #[error("chunk task aborted: {0}")]
    Aborted(String),
}

impl From<BulkError> for ChunkError {
    fn from(err: BulkError) -> Self {
        match err {
            BulkError::Storage(e) => ChunkError::Storage(e),
            other => ChunkError::Rejected(other.to_string()),
        }
    }
}

impl BulkError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, BulkError>;
