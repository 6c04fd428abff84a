use async_trait::async_trait;
use offq_contract::{RecordId, UploadRecord, UploadStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store is not connected")]
    NotConnected,
    #[error("record {0} already exists")]
    DuplicateKey(RecordId),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
    #[error("storage backend failure: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Durable persistence for upload records with a secondary index on status.
///
/// Every method has committed its write by the time it returns, and every
/// method fails with [`StoreError::NotConnected`] before touching storage when
/// the store is not open.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new record. An existing id is a [`StoreError::DuplicateKey`].
    async fn put(&self, record: &UploadRecord) -> Result<(), StoreError>;

    /// Inserts or replaces.
    async fn upsert(&self, record: &UploadRecord) -> Result<(), StoreError>;

    /// Replaces an existing record. Returns `false` without writing when the
    /// id is absent, so a concurrent delete always wins.
    async fn update(&self, record: &UploadRecord) -> Result<bool, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<UploadRecord>, StoreError>;

    /// Deleting an absent id is a no-op.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    async fn list_by_status(&self, status: UploadStatus)
        -> Result<Vec<UploadRecord>, StoreError>;

    async fn list_all(&self) -> Result<Vec<UploadRecord>, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}
