use payhub_types::PayhubError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transaction rolled back: {0}")]
    RolledBack(String),
}

impl From<StorageError> for PayhubError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => PayhubError::NotFound(what),
            other => PayhubError::Internal(other.to_string()),
        }
    }
}
