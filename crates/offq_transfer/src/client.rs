use async_trait::async_trait;
use chrono::{DateTime, Utc};
use offq_contract::{CodecError, TransferEnvelope};
use thiserror::Error;

/// Progress sink handed to a transfer, called with a percentage in 0..=100.
pub type ProgressFn = dyn Fn(u8) + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub message_id: String,
    pub accepted_at: DateTime<Utc>,
    pub bytes: usize,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer failed: {0}")]
    TransferFailed(String),
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
}

impl From<CodecError> for TransferError {
    fn from(err: CodecError) -> Self {
        TransferError::InvalidEnvelope(err.to_string())
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::TransferFailed(err.to_string())
    }
}

/// Delivers one envelope to the remote side. Implementations enforce their
/// own timeout and never retry.
#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn send(
        &self,
        envelope: &TransferEnvelope,
        progress: Option<&ProgressFn>,
    ) -> Result<TransferReceipt, TransferError>;

    /// Cheap reachability check for heartbeat monitoring.
    async fn probe(&self) -> bool;
}
