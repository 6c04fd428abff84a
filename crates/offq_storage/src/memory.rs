use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use offq_contract::{RecordId, UploadRecord, UploadStatus};
use parking_lot::Mutex;

use crate::store::{RecordStore, StoreError};

/// Process-local [`RecordStore`] for tests and demos. Nothing survives a
/// restart, but the rest of the contract (duplicate detection, idempotent
/// delete, `NotConnected`) matches the SQLite store.
#[derive(Debug)]
pub struct MemoryRecordStore {
    connected: AtomicBool,
    records: Mutex<HashMap<RecordId, UploadRecord>>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn disconnected() -> Self {
        let store = Self::new();
        store.disconnect();
        store
    }

    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Keeps the contents but rejects every call until reconnected.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }

    fn sorted(mut records: Vec<UploadRecord>) -> Vec<UploadRecord> {
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, record: &UploadRecord) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let mut records = self.records.lock();
        if records.contains_key(&record.id) {
            return Err(StoreError::DuplicateKey(record.id.clone()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn upsert(&self, record: &UploadRecord) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.records.lock().insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &UploadRecord) -> Result<bool, StoreError> {
        self.ensure_connected()?;
        match self.records.lock().get_mut(&record.id) {
            Some(existing) => {
                existing.status = record.status;
                existing.progress = record.progress;
                existing.retry_count = record.retry_count;
                existing.last_error = record.last_error.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<UploadRecord>, StoreError> {
        self.ensure_connected()?;
        Ok(self.records.lock().get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.records.lock().remove(id);
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: UploadStatus,
    ) -> Result<Vec<UploadRecord>, StoreError> {
        self.ensure_connected()?;
        let matching = self
            .records
            .lock()
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect();
        Ok(Self::sorted(matching))
    }

    async fn list_all(&self) -> Result<Vec<UploadRecord>, StoreError> {
        self.ensure_connected()?;
        let all = self.records.lock().values().cloned().collect();
        Ok(Self::sorted(all))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.records.lock().clear();
        Ok(())
    }
}
