mod app;

pub use app::{build_router, AppState, SseUpdate, MAX_REQUEST_BODY_BYTES};
