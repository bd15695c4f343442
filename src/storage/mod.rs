//! Persistence for the image pool, image sets and question bundles
//!
//! Business logic talks to the [`QuizStore`] trait. Two implementations are
//! provided: [`SqliteQuizStore`] for production and [`MemoryQuizStore`] for
//! tests and dry runs.
//!
//! Store calls are blocking. Async callers go through [`run_blocking`], which
//! moves the call onto tokio's blocking pool.

pub mod memory;
pub mod repository;
pub mod sqlite;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::error::{ErrorCategory, QuizsetErrorTrait};
use crate::models::{ImageId, ImageSetId, KeywordId, QuestionId};

pub use memory::MemoryQuizStore;
pub use repository::{QuizStore, StoreResult};
pub use sqlite::SqliteQuizStore;

/// Errors raised by store implementations
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite driver error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Question list could not be encoded or decoded
    #[error("Question encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// An image set outside the allowed size range was submitted
    #[error("Image set size {size} is outside 1..=3")]
    InvalidSetSize { size: usize },

    /// The same image appeared twice in one partition
    #[error("Image {0} appears in more than one set of the same partition")]
    DuplicateImage(ImageId),

    /// Referenced keyword does not exist
    #[error("Unknown keyword: {0}")]
    UnknownKeyword(KeywordId),

    /// Referenced image does not exist
    #[error("Unknown image: {0}")]
    UnknownImage(ImageId),

    /// Referenced image set does not exist
    #[error("Unknown image set: {0}")]
    UnknownImageSet(ImageSetId),

    /// Referenced question does not exist
    #[error("Unknown question: {0}")]
    UnknownQuestion(QuestionId),

    /// A store lock was poisoned by a panicking holder
    #[error("Store lock poisoned")]
    Poisoned,

    /// The blocking task running a store call failed
    #[error("Store task failed: {0}")]
    Task(String),

    /// I/O errors (database directory creation)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuizsetErrorTrait for StoreError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Task(_) | Self::Io(_) => true,
            _ => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

/// Thread-safe shared store handle
pub type SharedQuizStore = Arc<dyn QuizStore>;

/// Open (or create) a SQLite-backed store
pub fn create_sqlite_store(path: impl AsRef<Path>) -> StoreResult<SharedQuizStore> {
    let store = SqliteQuizStore::new(path)?;
    Ok(Arc::new(store))
}

/// Create an empty in-memory store
pub fn create_memory_store() -> SharedQuizStore {
    Arc::new(MemoryQuizStore::new())
}

/// Run a blocking store call on tokio's blocking pool
pub async fn run_blocking<T, F>(store: &SharedQuizStore, call: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn QuizStore) -> StoreResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(store.as_ref()))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        let store = create_memory_store();
        let stats = run_blocking(&store, |s| s.stats()).await.unwrap();
        assert_eq!(stats.images, 0);
    }

    #[test]
    fn test_busy_is_recoverable() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(StoreError::Sqlite(busy).is_recoverable());
        assert!(!StoreError::Poisoned.is_recoverable());
    }
}
