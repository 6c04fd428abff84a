use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use offq_contract::{encode_canonical, TransferEnvelope};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::client::{ProgressFn, TransferClient, TransferError, TransferReceipt};

#[derive(Debug, Clone)]
pub struct SpoolConfig {
    pub outbox_dir: PathBuf,
    pub timeout: Duration,
    pub chunk_size: usize,
}

impl SpoolConfig {
    pub fn new(outbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            outbox_dir: outbox_dir.into(),
            timeout: Duration::from_secs(30),
            chunk_size: 64 * 1024,
        }
    }
}

/// Delivers envelopes as canonical MessagePack files into an outbox
/// directory, typically a mount or synced folder owned by the receiver.
///
/// Files are written as `<record_id>.msgpack.part` and renamed once complete,
/// so the receiver never sees a partial upload. A missing outbox counts as
/// the remote side being unreachable.
#[derive(Debug, Clone)]
pub struct SpoolTransferClient {
    config: SpoolConfig,
}

impl SpoolTransferClient {
    pub fn new(config: SpoolConfig) -> Self {
        Self { config }
    }

    pub fn outbox_dir(&self) -> &Path {
        &self.config.outbox_dir
    }

    pub fn delivered_path(&self, record_id: &str) -> PathBuf {
        self.config.outbox_dir.join(format!("{record_id}.msgpack"))
    }

    async fn write_envelope(
        &self,
        envelope: &TransferEnvelope,
        bytes: &[u8],
        progress: Option<&ProgressFn>,
    ) -> Result<(), TransferError> {
        if !is_dir(&self.config.outbox_dir).await {
            return Err(TransferError::TransferFailed(format!(
                "outbox {} is unreachable",
                self.config.outbox_dir.display()
            )));
        }

        let target = self.delivered_path(&envelope.record_id);
        let partial = target.with_extension("msgpack.part");
        let mut file = tokio::fs::File::create(&partial).await?;

        let total = bytes.len().max(1);
        let mut written = 0usize;
        for chunk in bytes.chunks(self.config.chunk_size.max(1)) {
            file.write_all(chunk).await?;
            written += chunk.len();
            if let Some(report) = progress {
                report(((written * 100) / total).min(100) as u8);
            }
        }
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&partial, &target).await?;
        debug!(record_id = %envelope.record_id, path = %target.display(), "envelope spooled");
        Ok(())
    }
}

#[async_trait]
impl TransferClient for SpoolTransferClient {
    async fn send(
        &self,
        envelope: &TransferEnvelope,
        progress: Option<&ProgressFn>,
    ) -> Result<TransferReceipt, TransferError> {
        let bytes = encode_canonical(envelope)?;

        tokio::time::timeout(
            self.config.timeout,
            self.write_envelope(envelope, &bytes, progress),
        )
        .await
        .map_err(|_| {
            TransferError::TransferFailed(format!(
                "spool write timed out after {}ms",
                self.config.timeout.as_millis()
            ))
        })??;

        info!(
            record_id = %envelope.record_id,
            message_id = %envelope.message_id,
            attempt = envelope.attempt,
            bytes = bytes.len(),
            "upload delivered to outbox"
        );

        Ok(TransferReceipt {
            message_id: envelope.message_id.clone(),
            accepted_at: Utc::now(),
            bytes: bytes.len(),
        })
    }

    async fn probe(&self) -> bool {
        is_dir(&self.config.outbox_dir).await
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use offq_contract::{decode_canonical, MediaKind, UploadPayload, UploadRecord};

    use super::*;

    fn envelope() -> TransferEnvelope {
        let record = UploadRecord::new(UploadPayload::new(
            MediaKind::Image,
            "photo.jpg",
            vec![42; 300],
        ));
        TransferEnvelope::for_record(&record)
    }

    #[tokio::test]
    async fn missing_outbox_is_a_transfer_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = SpoolTransferClient::new(SpoolConfig::new(dir.path().join("absent")));

        assert!(!client.probe().await);
        let err = client.send(&envelope(), None).await.expect_err("send");
        assert!(matches!(err, TransferError::TransferFailed(_)));
    }

    #[tokio::test]
    async fn delivered_file_decodes_and_progress_reaches_100() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = SpoolConfig::new(dir.path());
        config.chunk_size = 64;
        let client = SpoolTransferClient::new(config);
        let envelope = envelope();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let report = move |pct: u8| sink.lock().expect("progress lock").push(pct);

        assert!(client.probe().await);
        let receipt = client
            .send(&envelope, Some(&report))
            .await
            .expect("send");
        assert_eq!(receipt.message_id, envelope.message_id);

        let bytes = std::fs::read(client.delivered_path(&envelope.record_id)).expect("read");
        assert_eq!(bytes.len(), receipt.bytes);
        let decoded: TransferEnvelope = decode_canonical(&bytes).expect("decode");
        assert_eq!(decoded, envelope);

        let seen = seen.lock().expect("progress lock");
        assert!(seen.len() > 1);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last(), Some(&100));
        assert!(!dir
            .path()
            .join(format!("{}.msgpack.part", envelope.record_id))
            .exists());
    }
}
