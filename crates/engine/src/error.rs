use fieldsync_core::CoreError;
use fieldsync_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("scope violation: {0}")]
    Scope(String),

    #[error("batch rejected: {0}")]
    BatchRejected(String),
}
