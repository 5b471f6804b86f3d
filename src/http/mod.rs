//! HTTP surface — `/api/v1` routes, Axum handlers over the shared
//! `AppContext`. One flat `Router` with layered middleware (trace,
//! compression, CORS) and a `with_state` at the end.

pub mod chat;
pub mod codebase;
pub mod health;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::PipelineDeps;
use crate::config::Config;
use crate::db::CodebaseRepository;
use crate::orchestrator::IngestionOrchestrator;
use crate::ratelimit::ConcurrentQueryGate;
use crate::session_store::{RateLimiter, SessionStore};

/// Shared application state threaded into every handler — no implicit
/// globals or module-level singletons.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: Arc<CodebaseRepository>,
    pub orchestrator: Arc<IngestionOrchestrator>,
    pub pipeline: Arc<PipelineDeps>,
    pub session_store: Arc<SessionStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub query_gate: Arc<ConcurrentQueryGate>,
    pub start_time: Instant,
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/v1/codebase/upload", post(codebase::upload))
        .route("/api/v1/codebase", get(codebase::list))
        .route("/api/v1/codebase/{id}", get(codebase::get).delete(codebase::delete))
        .route("/api/v1/codebase/{id}/status", get(codebase::status))
        .route("/api/v1/chat", post(chat::chat))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .route("/metrics", get(health::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
