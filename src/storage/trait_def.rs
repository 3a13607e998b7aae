use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("identifier must not be empty")]
    EmptyIdentifier,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Durable set of trusted device identifiers
///
/// Grows monotonically: entries are only ever inserted, never removed.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Initialize the storage (create tables, etc.)
    async fn init(&self) -> Result<()>;

    /// Insert `uid` with its first-seen timestamp unless already present
    ///
    /// Returns true if the identifier was new.
    async fn insert_if_absent(&self, uid: &str, first_seen: i64) -> StorageResult<bool>;

    /// Total number of distinct identifiers ever inserted
    async fn count(&self) -> StorageResult<u64>;
}
