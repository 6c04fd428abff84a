mod memory;
mod sqlite;
mod store;

pub use memory::MemoryRecordStore;
pub use sqlite::{SqliteRecordStore, StorageConfig};
pub use store::{RecordStore, StoreError};
