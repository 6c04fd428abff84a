use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use offq_contract::{MediaKind, UploadPayload, UploadRecord, UploadStatus};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::store::{RecordStore, StoreError};

const SCHEMA_SQL: &str = include_str!("sql/schema.sql");

const RECORD_COLUMNS: &str =
    "id, kind, file_name, content, status, progress, retry_count, created_at, last_error";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub sqlite_path: String,
}

/// SQLite-backed [`RecordStore`]. Starts disconnected; call
/// [`connect`](Self::connect) before use.
#[derive(Debug)]
pub struct SqliteRecordStore {
    config: StorageConfig,
    pool: RwLock<Option<SqlitePool>>,
}

#[derive(Debug, FromRow)]
struct UploadRow {
    id: String,
    kind: String,
    file_name: String,
    content: Vec<u8>,
    status: String,
    progress: i64,
    retry_count: i64,
    created_at: String,
    last_error: Option<String>,
}

impl UploadRow {
    fn into_record(self) -> Result<UploadRecord, StoreError> {
        let corrupt = |what: &str, detail: String| {
            StoreError::Corrupt(format!("record {}: {what}: {detail}", self.id))
        };

        let kind = MediaKind::from_str(&self.kind).map_err(|err| corrupt("kind", err.to_string()))?;
        let status = UploadStatus::from_str(&self.status)
            .map_err(|err| corrupt("status", err.to_string()))?;
        let progress =
            u8::try_from(self.progress).map_err(|err| corrupt("progress", err.to_string()))?;
        let retry_count = u32::try_from(self.retry_count)
            .map_err(|err| corrupt("retry_count", err.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|err| corrupt("created_at", err.to_string()))?
            .with_timezone(&Utc);

        Ok(UploadRecord {
            payload: UploadPayload {
                kind,
                file_name: self.file_name,
                bytes: self.content,
            },
            id: self.id,
            status,
            progress,
            retry_count,
            created_at,
            last_error: self.last_error,
        })
    }
}

impl SqliteRecordStore {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    /// Builds the store and connects it in one step.
    pub async fn open(config: StorageConfig) -> Result<Self, StoreError> {
        let store = Self::new(config);
        store.connect().await?;
        Ok(store)
    }

    pub async fn connect(&self) -> Result<(), StoreError> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let uri = normalize_sqlite_uri(&self.config.sqlite_path);
        let options = SqliteConnectOptions::from_str(&uri)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrate(&pool).await?;
        info!(path = %self.config.sqlite_path, "upload record store ready");
        *guard = Some(pool);
        Ok(())
    }

    /// Closes the pool. Later calls fail with [`StoreError::NotConnected`]
    /// until [`connect`](Self::connect) is called again.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            debug!(path = %self.config.sqlite_path, "upload record store closed");
        }
    }

    async fn pool(&self) -> Result<SqlitePool, StoreError> {
        self.pool.read().await.clone().ok_or(StoreError::NotConnected)
    }
}

async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    for statement in SCHEMA_SQL.split(';') {
        let sql = statement.trim();
        if sql.is_empty() {
            continue;
        }
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn put(&self, record: &UploadRecord) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        sqlx::query(
            "INSERT INTO upload_records(id, kind, file_name, content, status, progress, retry_count, created_at, last_error) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.payload.kind.as_str())
        .bind(&record.payload.file_name)
        .bind(&record.payload.bytes)
        .bind(record.status.as_str())
        .bind(i64::from(record.progress))
        .bind(i64::from(record.retry_count))
        .bind(format_timestamp(&record.created_at))
        .bind(&record.last_error)
        .execute(&pool)
        .await
        .map_err(|err| map_insert_error(err, &record.id))?;
        Ok(())
    }

    async fn upsert(&self, record: &UploadRecord) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        sqlx::query(
            "INSERT INTO upload_records(id, kind, file_name, content, status, progress, retry_count, created_at, last_error) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT(id) DO UPDATE SET kind = excluded.kind, file_name = excluded.file_name, content = excluded.content, status = excluded.status, progress = excluded.progress, retry_count = excluded.retry_count, created_at = excluded.created_at, last_error = excluded.last_error",
        )
        .bind(&record.id)
        .bind(record.payload.kind.as_str())
        .bind(&record.payload.file_name)
        .bind(&record.payload.bytes)
        .bind(record.status.as_str())
        .bind(i64::from(record.progress))
        .bind(i64::from(record.retry_count))
        .bind(format_timestamp(&record.created_at))
        .bind(&record.last_error)
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn update(&self, record: &UploadRecord) -> Result<bool, StoreError> {
        let pool = self.pool().await?;
        // payload and created_at are immutable after enqueue
        let result = sqlx::query(
            "UPDATE upload_records SET status = ?, progress = ?, retry_count = ?, last_error = ? WHERE id = ?",
        )
        .bind(record.status.as_str())
        .bind(i64::from(record.progress))
        .bind(i64::from(record.retry_count))
        .bind(&record.last_error)
        .bind(&record.id)
        .execute(&pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: &str) -> Result<Option<UploadRecord>, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM upload_records WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&pool)
        .await?;
        row.map(UploadRow::into_record).transpose()
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        sqlx::query("DELETE FROM upload_records WHERE id = ?")
            .bind(id)
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: UploadStatus,
    ) -> Result<Vec<UploadRecord>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM upload_records WHERE status = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&pool)
        .await?;
        rows.into_iter().map(UploadRow::into_record).collect()
    }

    async fn list_all(&self) -> Result<Vec<UploadRecord>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM upload_records ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&pool)
        .await?;
        rows.into_iter().map(UploadRow::into_record).collect()
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        sqlx::query("DELETE FROM upload_records")
            .execute(&pool)
            .await?;
        Ok(())
    }
}

fn map_insert_error(err: sqlx::Error, id: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::DuplicateKey(id.to_string());
        }
    }
    StoreError::Backend(err)
}

// fixed-width so lexical order matches chronological order
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn normalize_sqlite_uri(raw: &str) -> String {
    if raw.starts_with("sqlite:") {
        raw.to_string()
    } else {
        format!("sqlite://{raw}")
    }
}
