use crate::core::{FlagId, Retryable};
use thiserror::Error;

/// Storage layer error type.
///
/// Lookup failures (`FlagNotFound`, `FlagNameNotFound`) and the unique-name
/// violation (`NameTaken`) are reported as their own variants so the engine
/// can map them onto caller-facing errors; everything else means the store
/// could not do its job.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A database operation failed.
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("database operation failed")]
    Database(#[from] sqlx::Error),

    /// Could not open or reach the store.
    #[error("connection error: {0}")]
    Connection(String),

    /// No flag with this id.
    #[error("flag not found: id={0}")]
    FlagNotFound(FlagId),

    /// No flag with this name.
    #[error("flag not found: name={0}")]
    FlagNameNotFound(String),

    /// Another flag already uses this name.
    #[error("flag name already taken: {0}")]
    NameTaken(String),

    /// A stored value could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        match self {
            #[cfg(any(feature = "sqlite", feature = "postgres"))]
            StorageError::Database(_) => true,
            StorageError::Connection(_) => true,
            StorageError::FlagNotFound(_)
            | StorageError::FlagNameNotFound(_)
            | StorageError::NameTaken(_)
            | StorageError::Corrupt(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
