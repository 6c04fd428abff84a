use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use offq_connectivity::ConnectivityMonitor;
use offq_contract::{
    ProgressEvent, ProgressOutcome, QueueStatus, RecordId, TransferEnvelope, UploadPayload,
    UploadRecord, UploadStatus,
};
use offq_storage::{RecordStore, StoreError};
use offq_transfer::TransferClient;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::progress::{ProgressHub, Subscription};
use crate::retry::retry_with_backoff;

/// Outer attempts before a record is evicted instead of retried.
pub const MAX_RECORD_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("upload record {0} not found")]
    NotFound(RecordId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyDraining,
    Unreachable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: usize,
    pub evicted: usize,
    /// Records cancelled by someone else while this pass was handling them.
    pub vanished: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DrainOutcome {
    Skipped { reason: SkipReason },
    Completed(DrainReport),
}

pub type DrainHandle = JoinHandle<Result<DrainOutcome, QueueError>>;

/// Result of [`QueueManager::retry_all_failed`].
#[derive(Debug)]
pub struct Retried {
    pub count: usize,
    pub drain: DrainHandle,
}

enum RecordOutcome {
    Delivered,
    Failed,
    Evicted,
    Vanished,
}

/// Owns the upload lifecycle: enqueue, single-flight drains, per-record
/// retry/eviction and progress notification.
///
/// Cloning is cheap and every clone drives the same queue, sharing one
/// draining guard.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn RecordStore>,
    client: Arc<dyn TransferClient>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    config: QueueConfig,
    progress: Arc<ProgressHub>,
    draining: AtomicBool,
    failed_passes: AtomicU32,
    redrain_scheduled: AtomicBool,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl QueueManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        client: Arc<dyn TransferClient>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        config: QueueConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                connectivity,
                config,
                progress: ProgressHub::new(),
                draining: AtomicBool::new(false),
                failed_passes: AtomicU32::new(0),
                redrain_scheduled: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn is_reachable(&self) -> bool {
        self.inner.connectivity.is_reachable()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// Re-homes records left `in_flight` by a crash to `pending`, then
    /// listens for connectivity edges and drains on each one.
    ///
    /// Returns the listener task, which runs until aborted.
    pub async fn start(&self) -> Result<JoinHandle<()>, QueueError> {
        self.recover().await?;

        let mut events = self.inner.connectivity.subscribe();
        let manager = self.clone();
        let listener = tokio::spawn(async move {
            while events.recv().await.is_some() {
                info!("connectivity restored, draining upload queue");
                manager.spawn_drain();
            }
            debug!("connectivity monitor closed, listener exiting");
        });

        if self.is_reachable() {
            self.spawn_drain();
        }
        Ok(listener)
    }

    /// Re-homes records left `in_flight` by a crash to `pending`. Must only
    /// run while no drain is active, i.e. at startup.
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let recovered = self.requeue_in_flight().await?;
        if recovered > 0 {
            warn!(recovered, "recovered uploads left in flight by a previous run");
        }
        Ok(recovered)
    }

    async fn requeue_in_flight(&self) -> Result<usize, QueueError> {
        let store = &self.inner.store;
        let mut requeued = 0;
        for mut record in store.list_by_status(UploadStatus::InFlight).await? {
            record.status = UploadStatus::Pending;
            record.progress = 0;
            if store.update(&record).await? {
                debug!(record_id = %record.id, "in-flight upload returned to pending");
                self.inner.progress.publish(&record.progress_event());
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    /// Puts a record the pass could not finish back to `pending`. Best effort:
    /// the store may be the reason the pass failed.
    async fn release(&self, id: &str) {
        let store = &self.inner.store;
        let released = match store.get(id).await {
            Ok(Some(mut record)) if record.status == UploadStatus::InFlight => {
                record.status = UploadStatus::Pending;
                record.progress = 0;
                store.update(&record).await
            }
            Ok(_) => Ok(false),
            Err(err) => Err(err),
        };
        if let Err(err) = released {
            warn!(record_id = %id, error = %err, "could not release upload, next pass will requeue it");
        }
    }

    /// Persists a new `pending` record and, when reachable, kicks off a
    /// background drain. Transfer failures never surface here.
    pub async fn enqueue(&self, payload: UploadPayload) -> Result<RecordId, QueueError> {
        let record = UploadRecord::new(payload);
        self.inner.store.put(&record).await?;
        info!(
            record_id = %record.id,
            kind = %record.payload.kind,
            file_name = %record.payload.file_name,
            bytes = record.payload.bytes.len(),
            "upload enqueued"
        );
        self.inner.progress.publish(&record.progress_event());

        if self.is_reachable() {
            self.spawn_drain();
        }
        Ok(record.id)
    }

    /// Runs one drain pass unless one is already running or the remote side
    /// is unreachable, in which case it returns immediately.
    pub async fn drain(&self) -> Result<DrainOutcome, QueueError> {
        let inner = &self.inner;
        if !inner.connectivity.is_reachable() {
            debug!("drain skipped: unreachable");
            return Ok(DrainOutcome::Skipped {
                reason: SkipReason::Unreachable,
            });
        }
        if inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("drain skipped: already draining");
            return Ok(DrainOutcome::Skipped {
                reason: SkipReason::AlreadyDraining,
            });
        }
        let _guard = DrainGuard(&inner.draining);

        let report = self.drain_pass().await?;
        self.schedule_redrain(&report);
        Ok(DrainOutcome::Completed(report))
    }

    pub fn spawn_drain(&self) -> DrainHandle {
        let manager = self.clone();
        tokio::spawn(async move {
            let outcome = manager.drain().await;
            if let Err(err) = &outcome {
                error!(error = %err, "background drain failed");
            }
            outcome
        })
    }

    async fn drain_pass(&self) -> Result<DrainReport, QueueError> {
        let store = &self.inner.store;

        // no other pass is running, so anything in flight was abandoned by one
        let requeued = self.requeue_in_flight().await?;
        if requeued > 0 {
            warn!(requeued, "requeued uploads abandoned by an earlier pass");
        }

        // failed records are eligible again on every new pass
        for mut record in store.list_by_status(UploadStatus::Failed).await? {
            record.status = UploadStatus::Pending;
            if store.update(&record).await? {
                self.inner.progress.publish(&record.progress_event());
            }
        }

        let pending = store.list_by_status(UploadStatus::Pending).await?;
        info!(count = pending.len(), "drain pass started");

        let mut report = DrainReport::default();
        for record in pending {
            let id = record.id.clone();
            match self.process(record).await {
                Ok(RecordOutcome::Delivered) => report.delivered += 1,
                Ok(RecordOutcome::Failed) => report.failed += 1,
                Ok(RecordOutcome::Evicted) => report.evicted += 1,
                Ok(RecordOutcome::Vanished) => report.vanished += 1,
                Err(err) => {
                    error!(record_id = %id, error = %err, "drain pass aborted");
                    self.release(&id).await;
                    return Err(err);
                }
            }
        }

        info!(
            delivered = report.delivered,
            failed = report.failed,
            evicted = report.evicted,
            vanished = report.vanished,
            "drain pass finished"
        );
        Ok(report)
    }

    async fn process(&self, mut record: UploadRecord) -> Result<RecordOutcome, QueueError> {
        let store = &self.inner.store;
        let hub = &self.inner.progress;

        record.status = UploadStatus::InFlight;
        record.progress = 0;
        if !store.update(&record).await? {
            debug!(record_id = %record.id, "record cancelled before send");
            return Ok(RecordOutcome::Vanished);
        }
        hub.publish(&record.progress_event());

        let envelope = TransferEnvelope::for_record(&record);
        let forward = {
            let hub = hub.clone();
            let template = record.progress_event();
            move |pct: u8| {
                let mut event = template.clone();
                event.progress = pct.min(100);
                hub.publish(&event);
            }
        };
        let client = &self.inner.client;
        let result = retry_with_backoff(&self.inner.config.retry, |attempt| {
            debug!(record_id = %envelope.record_id, attempt, "sending upload");
            client.send(&envelope, Some(&forward))
        })
        .await;

        match result {
            Ok(receipt) => {
                store.delete(&record.id).await?;
                info!(
                    record_id = %record.id,
                    message_id = %receipt.message_id,
                    bytes = receipt.bytes,
                    "upload delivered"
                );
                // notification only; the record no longer exists
                let mut event = record.progress_event();
                event.progress = 100;
                event.outcome = Some(ProgressOutcome::Delivered);
                hub.publish(&event);
                Ok(RecordOutcome::Delivered)
            }
            Err(err) => {
                record.retry_count += 1;
                record.progress = 0;
                record.status = UploadStatus::Failed;
                record.last_error = Some(err.to_string());

                if record.retry_count >= MAX_RECORD_ATTEMPTS {
                    if store.get(&record.id).await?.is_none() {
                        debug!(record_id = %record.id, "record cancelled during transfer");
                        return Ok(RecordOutcome::Vanished);
                    }
                    store.delete(&record.id).await?;
                    error!(
                        record_id = %record.id,
                        retry_count = record.retry_count,
                        error = %err,
                        "upload evicted after repeated failures"
                    );
                    let mut event = record.progress_event();
                    event.outcome = Some(ProgressOutcome::Evicted);
                    hub.publish(&event);
                    return Ok(RecordOutcome::Evicted);
                }

                if !store.update(&record).await? {
                    debug!(record_id = %record.id, "record cancelled during transfer");
                    return Ok(RecordOutcome::Vanished);
                }
                warn!(
                    record_id = %record.id,
                    retry_count = record.retry_count,
                    error = %err,
                    "upload attempt failed"
                );
                hub.publish(&record.progress_event());
                Ok(RecordOutcome::Failed)
            }
        }
    }

    fn schedule_redrain(&self, report: &DrainReport) {
        let Some(policy) = self.inner.config.redrain else {
            return;
        };
        if report.failed == 0 {
            self.inner.failed_passes.store(0, Ordering::Release);
            return;
        }

        let passes = self.inner.failed_passes.fetch_add(1, Ordering::AcqRel) + 1;
        if passes > policy.max_attempts {
            debug!(passes, "redrain budget spent, waiting for the next trigger");
            return;
        }
        if self.inner.redrain_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let delay = policy.delay(passes);
        info!(passes, delay_ms = delay.as_millis() as u64, "scheduling redrain");
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager
                .inner
                .redrain_scheduled
                .store(false, Ordering::Release);
            if let Err(err) = manager.drain().await {
                error!(error = %err, "redrain failed");
            }
        });
    }

    /// Manual retry: back to `pending` with the error cleared, then a
    /// background drain.
    pub async fn retry(&self, id: &str) -> Result<DrainHandle, QueueError> {
        let store = &self.inner.store;
        let mut record = store
            .get(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        record.status = UploadStatus::Pending;
        record.progress = 0;
        record.last_error = None;
        if !store.update(&record).await? {
            return Err(QueueError::NotFound(id.to_string()));
        }
        info!(record_id = %id, retry_count = record.retry_count, "manual retry requested");
        self.inner.progress.publish(&record.progress_event());
        Ok(self.spawn_drain())
    }

    /// Resets every `failed` record and triggers a single drain for all of them.
    pub async fn retry_all_failed(&self) -> Result<Retried, QueueError> {
        let store = &self.inner.store;
        let mut count = 0;
        for mut record in store.list_by_status(UploadStatus::Failed).await? {
            record.status = UploadStatus::Pending;
            record.progress = 0;
            record.last_error = None;
            if store.update(&record).await? {
                self.inner.progress.publish(&record.progress_event());
                count += 1;
            }
        }
        info!(count, "retrying all failed uploads");
        Ok(Retried {
            count,
            drain: self.spawn_drain(),
        })
    }

    /// Deletes the record whatever its state. Unknown ids are fine.
    pub async fn cancel(&self, id: &str) -> Result<(), QueueError> {
        self.inner.store.delete(id).await?;
        info!(record_id = %id, "upload cancelled");
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), QueueError> {
        self.inner.store.clear().await?;
        info!("upload queue cleared");
        Ok(())
    }

    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        let records = self.inner.store.list_all().await?;
        Ok(QueueStatus::from_records(&records))
    }

    pub async fn get(&self, id: &str) -> Result<Option<UploadRecord>, QueueError> {
        Ok(self.inner.store.get(id).await?)
    }

    pub async fn records(&self) -> Result<Vec<UploadRecord>, QueueError> {
        Ok(self.inner.store.list_all().await?)
    }

    pub fn on_progress<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.inner.progress.subscribe(callback)
    }
}
