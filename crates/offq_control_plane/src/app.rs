use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use futures::stream::StreamExt;
use offq_contract::{MediaKind, ProgressEvent, ProgressOutcome, RecordSummary, UploadPayload};
use offq_queue::{QueueError, QueueManager};
use offq_storage::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

/// Request body cap. Payloads arrive base64 encoded, so this admits media of
/// roughly three quarters of the size.
pub const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseUpdate {
    pub event_type: String,
    pub data: Value,
}

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    kind: MediaKind,
    file_name: String,
    payload_base64: String,
}

#[derive(Clone)]
pub struct AppState {
    pub queue: QueueManager,
    pub sse_bus: broadcast::Sender<SseUpdate>,
}

impl AppState {
    /// Mirrors every queue progress event onto the SSE bus.
    pub fn new(queue: QueueManager) -> Self {
        let (sse_bus, _) = broadcast::channel(256);
        let bus = sse_bus.clone();
        // lives as long as the queue; never unsubscribed
        let _subscription = queue.on_progress(move |event: &ProgressEvent| {
            let data = serde_json::to_value(event).unwrap_or(Value::Null);
            let _ = bus.send(SseUpdate {
                event_type: event_type_for(event).to_string(),
                data,
            });
        });
        Self { queue, sse_bus }
    }
}

fn event_type_for(event: &ProgressEvent) -> &'static str {
    match event.outcome {
        Some(ProgressOutcome::Delivered) => "upload.delivered",
        Some(ProgressOutcome::Evicted) => "upload.evicted",
        None => "upload.progress",
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route(
            "/v1/uploads",
            get(list_uploads).post(enqueue_upload).delete(clear_uploads),
        )
        .route("/v1/uploads/status", get(queue_status))
        .route("/v1/uploads/stream", get(stream_uploads))
        .route("/v1/uploads/drain", post(drain_queue))
        .route("/v1/uploads/retry-failed", post(retry_failed))
        .route("/v1/uploads/{id}", get(get_upload).delete(cancel_upload))
        .route("/v1/uploads/{id}/retry", post(retry_upload))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .with_state(state)
}

async fn health_live() -> impl IntoResponse {
    Json(json!({
        "status": "live",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.queue.is_reachable();
    let payload = Json(json!({
        "status": if ready { "ready" } else { "degraded" },
        "draining": state.queue.is_draining(),
        "timestamp": Utc::now().to_rfc3339()
    }));

    if ready {
        (StatusCode::OK, payload).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, payload).into_response()
    }
}

async fn list_uploads(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let records = state.queue.records().await.map_err(queue_error)?;
    let items: Vec<RecordSummary> = records.iter().map(|record| record.summary()).collect();
    Ok((StatusCode::OK, Json(json!({ "items": items }))))
}

async fn queue_status(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let status = state.queue.status().await.map_err(queue_error)?;
    Ok((StatusCode::OK, Json(status)))
}

async fn get_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    match state.queue.get(&id).await.map_err(queue_error)? {
        Some(record) => Ok((StatusCode::OK, Json(record.summary()))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error":"upload_not_found"})),
        )),
    }
}

async fn enqueue_upload(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let bytes = STANDARD.decode(request.payload_base64.as_bytes()).map_err(|err| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_payload_base64", "detail": err.to_string() })),
        )
    })?;

    let payload = UploadPayload::new(request.kind, request.file_name, bytes);
    let id = state.queue.enqueue(payload).await.map_err(queue_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "id": id.clone(),
            "status": "pending",
            "status_url": format!("/v1/uploads/{}", id)
        })),
    ))
}

async fn retry_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    // the drain keeps running after the handle is dropped
    let _drain = state.queue.retry(&id).await.map_err(queue_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": id, "status": "pending" })),
    ))
}

async fn retry_failed(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let retried = state.queue.retry_all_failed().await.map_err(queue_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "retried": retried.count })),
    ))
}

async fn drain_queue(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let outcome = state.queue.drain().await.map_err(queue_error)?;
    Ok((StatusCode::OK, Json(outcome)))
}

async fn cancel_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    state.queue.cancel(&id).await.map_err(queue_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_uploads(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    state.queue.clear().await.map_err(queue_error)?;
    info!("upload queue cleared over http");
    Ok(StatusCode::NO_CONTENT)
}

async fn stream_uploads(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    let receiver = state.sse_bus.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(update) => {
                let data = serde_json::to_string(&update.data).unwrap_or_else(|_| "{}".to_string());
                Some(Ok(SseEvent::default().event(update.event_type).data(data)))
            }
            Err(_) => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn queue_error(err: QueueError) -> (StatusCode, Json<Value>) {
    match err {
        QueueError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "upload_not_found", "id": id })),
        ),
        QueueError::Store(StoreError::NotConnected) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "store_not_connected" })),
        ),
        other => internal_error(other.into()),
    }
}

fn internal_error(error: anyhow::Error) -> (StatusCode, Json<Value>) {
    error!(error = %error, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal_error", "detail": error.to_string() })),
    )
}
