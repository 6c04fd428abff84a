use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use offq_contract::{RecordId, TransferEnvelope};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::client::{ProgressFn, TransferClient, TransferError, TransferReceipt};

/// Scriptable in-process transfer client.
///
/// Sends succeed by default. Failures can be scripted for the next N sends or
/// for every send, sends can be delayed or held until released, and every
/// attempt is counted so callers can assert on delivery behavior.
#[derive(Debug, Default)]
pub struct InMemoryTransferClient {
    state: Mutex<ScriptState>,
    held: AtomicBool,
    gate: Notify,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[derive(Debug, Default)]
struct ScriptState {
    unreachable: bool,
    fail_all: bool,
    fail_next: u32,
    latency: Option<Duration>,
    progress_steps: u8,
    attempts: HashMap<RecordId, u32>,
    delivered: Vec<TransferEnvelope>,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryTransferClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        self.state.lock().fail_next = count;
    }

    pub fn fail_always(&self, fail: bool) {
        self.state.lock().fail_all = fail;
    }

    /// Controls the answer of [`TransferClient::probe`]; sends also fail
    /// while unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Number of intermediate progress reports per successful send.
    pub fn set_progress_steps(&self, steps: u8) {
        self.state.lock().progress_steps = steps;
    }

    /// Parks every subsequent send until [`release_one`](Self::release_one)
    /// lets it through.
    pub fn hold_sends(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_one(&self) {
        self.gate.notify_one();
    }

    pub fn stop_holding(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    pub fn total_attempts(&self) -> u32 {
        self.state.lock().attempts.values().sum()
    }

    pub fn attempts_for(&self, record_id: &str) -> u32 {
        self.state
            .lock()
            .attempts
            .get(record_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn delivered(&self) -> Vec<TransferEnvelope> {
        self.state.lock().delivered.clone()
    }

    /// Highest number of sends observed running at the same time.
    pub fn max_concurrent_sends(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn sends_in_progress(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferClient for InMemoryTransferClient {
    async fn send(
        &self,
        envelope: &TransferEnvelope,
        progress: Option<&ProgressFn>,
    ) -> Result<TransferReceipt, TransferError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        let latency = {
            let mut state = self.state.lock();
            *state
                .attempts
                .entry(envelope.record_id.clone())
                .or_default() += 1;
            state.latency
        };

        if self.held.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let steps = {
            let mut state = self.state.lock();
            if state.unreachable {
                return Err(TransferError::TransferFailed(
                    "remote host unreachable".to_string(),
                ));
            }
            if state.fail_all {
                return Err(TransferError::TransferFailed(
                    "remote rejected upload".to_string(),
                ));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(TransferError::TransferFailed(
                    "remote rejected upload".to_string(),
                ));
            }
            state.delivered.push(envelope.clone());
            state.progress_steps
        };

        if let Some(report) = progress {
            for step in 1..=steps {
                report(((u32::from(step) * 100) / (u32::from(steps) + 1)) as u8);
            }
        }

        debug!(record_id = %envelope.record_id, attempt = envelope.attempt, "in-memory delivery");
        Ok(TransferReceipt {
            message_id: envelope.message_id.clone(),
            accepted_at: Utc::now(),
            bytes: envelope.payload_base64.len(),
        })
    }

    async fn probe(&self) -> bool {
        !self.state.lock().unreachable
    }
}
