//! Liveness/readiness and Prometheus exposition. Readiness reaches the
//! vector index and relational store instead of only reporting uptime.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use super::AppContext;

pub async fn health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": ctx.start_time.elapsed().as_secs(),
    }))
}

/// Readiness additionally verifies the backing stores the core cannot
/// function without are reachable.
pub async fn ready(State(ctx): State<AppContext>) -> impl IntoResponse {
    let vector_ok = ctx.pipeline.vector_index.health().await.is_ok();
    let db_ok = ctx.db.get(uuid::Uuid::nil()).await.is_ok();

    let ready = vector_ok && db_ok;
    let status = if ready { axum::http::StatusCode::OK } else { axum::http::StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "ready": ready,
            "vector_index": vector_ok,
            "database": db_ok,
        })),
    )
}

pub async fn metrics() -> impl IntoResponse {
    ([("content-type", "text/plain; version=0.0.4")], crate::metrics::render())
}
