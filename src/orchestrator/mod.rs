//! C5 — Ingestion Orchestrator.
//!
//! Wires the stage pipeline to the durable workflow runtime and owns the
//! background cron sweep. `IngestionOrchestrator` is the one entry point
//! the API layer calls; it never touches the stages directly.

pub mod stages;
pub mod workflow;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::acquire::Source;
use crate::config::Config;
use crate::db::CodebaseRepository;
use crate::embeddings::EmbeddingProvider;
use crate::session_store::SessionStore;
use crate::vector_index::VectorIndex;

use stages::{run_ingestion, StageContext};
use workflow::{PostgresWorkflowRuntime, WorkflowStatus};

pub struct IngestionOrchestrator {
    runtime: Arc<PostgresWorkflowRuntime>,
    db: Arc<CodebaseRepository>,
    vector_index: Arc<dyn VectorIndex>,
    embeddings: Arc<dyn EmbeddingProvider>,
    config: Arc<Config>,
}

impl IngestionOrchestrator {
    pub fn new(
        runtime: Arc<PostgresWorkflowRuntime>,
        db: Arc<CodebaseRepository>,
        vector_index: Arc<dyn VectorIndex>,
        embeddings: Arc<dyn EmbeddingProvider>,
        config: Arc<Config>,
    ) -> Self {
        IngestionOrchestrator { runtime, db, vector_index, embeddings, config }
    }

    /// Starts ingestion for `codebase_id` under workflow id `ingest-<id>`,
    /// matching `Codebase::new`'s derived workflow id. A duplicate call for
    /// a codebase already processing is a no-op (enforced by the runtime).
    pub async fn start(&self, codebase_id: Uuid, source: Source) {
        let workflow_id = format!("ingest-{codebase_id}");
        if let Err(e) = self.runtime.register(&workflow_id).await {
            tracing::error!(workflow_id = %workflow_id, error = %e, "failed to register workflow checkpoint row");
        }

        let ctx = StageContext {
            db: self.db.clone(),
            vector_index: self.vector_index.clone(),
            embeddings: self.embeddings.clone(),
            config: self.config.clone(),
        };

        self.runtime
            .start(workflow_id, move |status, cancel| {
                Box::pin(run_ingestion(ctx, codebase_id, source, status, cancel))
                    as futures::future::BoxFuture<'static, ()>
            })
            .await;
    }

    pub async fn status(&self, codebase_id: Uuid) -> Option<WorkflowStatus> {
        let workflow_id = format!("ingest-{codebase_id}");
        self.runtime.get_status(&workflow_id).await
    }

    pub async fn cancel(&self, codebase_id: Uuid) {
        let workflow_id = format!("ingest-{codebase_id}");
        self.runtime.signal_cancel(&workflow_id).await;
    }
}

/// Daily cron sweep: walks every codebase's session index and removes
/// entries whose session body already expired in the key-value store.
/// Runs as a `tokio::time::interval` loop owned by this process rather than
/// delegating to an external cron scheduler.
pub async fn spawn_session_sweep(
    session_store: Arc<SessionStore>,
    db: Arc<CodebaseRepository>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        tracing::info!("running scheduled session sweep");
        let (codebases, _) = match db.list(1, 10_000).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "session sweep: failed to list codebases");
                continue;
            }
        };
        let mut removed_by_codebase: HashMap<Uuid, u64> = HashMap::new();
        for codebase in codebases {
            match session_store.sweep_stale_index_entries(codebase.id).await {
                Ok(removed) if removed > 0 => {
                    removed_by_codebase.insert(codebase.id, removed);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(codebase_id = %codebase.id, error = %e, "session sweep failed for codebase");
                }
            }
        }
        if !removed_by_codebase.is_empty() {
            tracing::info!(swept = removed_by_codebase.len(), "session sweep removed stale index entries");
        }
    }
}
