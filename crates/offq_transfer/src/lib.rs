mod client;
mod memory;
mod spool;

pub use client::{ProgressFn, TransferClient, TransferError, TransferReceipt};
pub use memory::InMemoryTransferClient;
pub use spool::{SpoolConfig, SpoolTransferClient};
