//! Offline upload queue: durable enqueue, single-flight drains, two-level
//! retry with jittered exponential backoff, and progress notification.

pub mod backoff;
mod config;
mod manager;
pub mod progress;
pub mod retry;

pub use backoff::BackoffPolicy;
pub use config::QueueConfig;
pub use manager::{
    DrainHandle, DrainOutcome, DrainReport, QueueError, QueueManager, Retried, SkipReason,
    MAX_RECORD_ATTEMPTS,
};
pub use progress::{ProgressHub, Subscription};
pub use retry::retry_with_backoff;
