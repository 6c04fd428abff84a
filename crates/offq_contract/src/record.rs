use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub type RecordId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// Lifecycle state of a persisted upload. Delivered records are deleted, so
/// there is no completed variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    InFlight,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            other => Err(ParseEnumError {
                kind: "media kind",
                value: other.to_string(),
            }),
        }
    }
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::InFlight => "in_flight",
            UploadStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "in_flight" => Ok(UploadStatus::InFlight),
            "failed" => Ok(UploadStatus::Failed),
            other => Err(ParseEnumError {
                kind: "upload status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadPayload {
    pub kind: MediaKind,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadPayload {
    pub fn new(kind: MediaKind, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// One unit of work awaiting transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadRecord {
    pub id: RecordId,
    pub payload: UploadPayload,
    pub status: UploadStatus,
    /// Advisory, 0..=100. Reset on every attempt.
    pub progress: u8,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl UploadRecord {
    /// Builds a fresh `pending` record with a new UUIDv7 id.
    pub fn new(payload: UploadPayload) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            payload,
            status: UploadStatus::Pending,
            progress: 0,
            retry_count: 0,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.id.clone(),
            kind: self.payload.kind,
            file_name: self.payload.file_name.clone(),
            size_bytes: self.payload.bytes.len(),
            status: self.status,
            progress: self.progress,
            retry_count: self.retry_count,
            created_at: self.created_at,
            last_error: self.last_error.clone(),
        }
    }

    pub fn progress_event(&self) -> ProgressEvent {
        ProgressEvent {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
            outcome: None,
        }
    }
}

/// Record metadata without the payload bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordSummary {
    pub id: RecordId,
    pub kind: MediaKind,
    pub file_name: String,
    pub size_bytes: usize,
    pub status: UploadStatus,
    pub progress: u8,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressOutcome {
    Delivered,
    Evicted,
}

/// Notification delivered to progress subscribers on every record mutation.
///
/// Terminal events carry an `outcome`; the record they describe is already
/// gone from the store by the time they are delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressEvent {
    pub id: RecordId,
    pub status: UploadStatus,
    pub progress: u8,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub outcome: Option<ProgressOutcome>,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStatus {
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub failed: usize,
}

impl QueueStatus {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a UploadRecord>) -> Self {
        records
            .into_iter()
            .fold(QueueStatus::default(), |mut acc, record| {
                acc.total += 1;
                match record.status {
                    UploadStatus::Pending => acc.pending += 1,
                    UploadStatus::InFlight => acc.in_flight += 1,
                    UploadStatus::Failed => acc.failed += 1,
                }
                acc
            })
    }
}
