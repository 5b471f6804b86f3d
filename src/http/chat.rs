//! `POST /api/v1/chat` — the Query Agent Pipeline's transport layer.
//!
//! Resolves/validates the session, applies the rate-limit and concurrency
//! gates, runs the five-node pipeline, and re-encodes each `PipelineEvent`
//! onto the wire SSE schema over `axum::response::sse::Sse`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{ConnectInfo, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::agent::state::AgentState;
use crate::agent::PipelineEvent;
use crate::error::AppError;
use crate::model::{Message, MessageRole};

use super::AppContext;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub codebase_id: Uuid,
    pub query: String,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default = "default_stream")]
    #[allow(dead_code)]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

/// `stream` is accepted but every response streams regardless — SSE is the
/// one transport this service speaks for `/chat` (no non-streaming
/// variant).
pub async fn chat(
    State(ctx): State<AppContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if req.query.trim().is_empty() {
        return Err(AppError::Validation("query must not be empty".to_string()));
    }

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let allowed = ctx.rate_limiter.check(&addr.ip().to_string(), now).await?;
    if !allowed {
        crate::metrics::record_query_rate_limited();
        return Err(AppError::RateLimited);
    }
    crate::metrics::record_query_request();

    let session_id = match req.session_id {
        Some(id) => {
            let session = ctx
                .session_store
                .get_session(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;
            if session.codebase_id != req.codebase_id {
                return Err(AppError::NotFound(format!("session {id} not found")));
            }
            id
        }
        None => ctx.session_store.create_session(req.codebase_id).await?.id,
    };

    let (tx, rx) = mpsc::channel::<Event>(32);

    let permit = ctx.query_gate.acquire_owned().await;
    let pipeline = ctx.pipeline.clone();
    let session_store = ctx.session_store.clone();
    let query = req.query.clone();
    let codebase_id = req.codebase_id;

    tokio::spawn(async move {
        let _permit = permit;

        let session_id_payload = json!({"type": "session_id", "session_id": session_id});
        if tx.send(Event::default().data(session_id_payload.to_string())).await.is_err() {
            return;
        }

        let (events_tx, mut events_rx) = mpsc::channel::<PipelineEvent>(32);
        let state = AgentState::new(codebase_id, Some(session_id), query.clone());

        let run = tokio::spawn(async move { crate::agent::run(state, &pipeline, events_tx).await });

        while let Some(event) = events_rx.recv().await {
            let payload = match event {
                PipelineEvent::Chunk(content) => json!({"type": "chunk", "content": content}),
                PipelineEvent::Sources(sources) => json!({"type": "sources", "sources": sources}),
                PipelineEvent::Validation(results) => {
                    json!({"type": "validation", "validation": validation_json(&results)})
                }
                PipelineEvent::Done => json!({"type": "done"}),
                PipelineEvent::Error(meta) => json!({
                    "type": "error",
                    "error": meta.user_message,
                    "error_type": error_type_str(meta.category),
                    "recovery_suggestion": meta.recovery_suggestion,
                }),
            };
            if tx.send(Event::default().data(payload.to_string())).await.is_err() {
                return;
            }
        }

        let final_state = match run.await {
            Ok(state) => state,
            Err(_) => return,
        };

        if final_state.error_metadata.is_none() {
            let user_message = Message {
                role: MessageRole::User,
                content: query,
                citations: None,
                retrieved_chunk_ids: None,
                token_count: None,
                created_at: chrono::Utc::now(),
            };
            let assistant_message = Message {
                role: MessageRole::Assistant,
                content: final_state.response.clone(),
                citations: Some(final_state.sources.clone()),
                retrieved_chunk_ids: None,
                token_count: None,
                created_at: chrono::Utc::now(),
            };
            if let Err(e) = session_store.append_message(session_id, &user_message).await {
                tracing::warn!(session_id = %session_id, error = %e, "failed to persist user turn");
            }
            if let Err(e) = session_store.append_message(session_id, &assistant_message).await {
                tracing::warn!(session_id = %session_id, error = %e, "failed to persist assistant turn");
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn validation_json(results: &crate::agent::state::ValidationResults) -> serde_json::Value {
    json!({
        "citation_accuracy": results.citation_accuracy,
        "hallucinated_identifiers": results.hallucinated_identifiers,
        "context_alignment": results.context_alignment,
        "overall_score": results.overall_score,
    })
}

fn error_type_str(category: crate::agent::state::ErrorCategory) -> &'static str {
    use crate::agent::state::ErrorCategory::*;
    match category {
        UserInput => "user_input",
        Retrieval => "retrieval",
        RateLimit => "rate_limit",
        LlmService => "llm_service",
        Timeout => "timeout",
        Network => "network",
        Authentication => "authentication",
        Resource => "resource",
        Unknown => "unknown",
    }
}
