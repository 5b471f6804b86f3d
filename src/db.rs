//! Relational metadata store — the Codebase row, persisted in Postgres via
//! `sqlx`. The durable workflow runtime treats `update_codebase_status` as
//! an activity; here it's one more method on the repository the
//! orchestrator calls directly.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{Codebase, CodebaseStatus, SourceKind};

pub struct CodebaseRepository {
    pool: PgPool,
}

impl CodebaseRepository {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| AppError::ExternalService { service: "postgres", message: e.to_string() })?;
        Ok(CodebaseRepository { pool })
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS codebases (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                source_kind TEXT NOT NULL,
                source_locator TEXT,
                status TEXT NOT NULL,
                total_files INTEGER NOT NULL DEFAULT 0,
                processed_files INTEGER NOT NULL DEFAULT 0,
                primary_language TEXT,
                languages TEXT[] NOT NULL DEFAULT '{}',
                size_bytes BIGINT NOT NULL DEFAULT 0,
                error_message TEXT,
                workflow_id TEXT NOT NULL,
                secrets_detected INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                storage_path TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::ExternalService { service: "postgres", message: e.to_string() })?;
        Ok(())
    }

    pub async fn insert(&self, codebase: &Codebase) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO codebases
                (id, name, description, source_kind, source_locator, status,
                 total_files, processed_files, primary_language, languages,
                 size_bytes, error_message, workflow_id, secrets_detected,
                 created_at, updated_at, storage_path)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(codebase.id)
        .bind(&codebase.name)
        .bind(&codebase.description)
        .bind(source_kind_str(codebase.source_kind))
        .bind(&codebase.source_locator)
        .bind(status_str(codebase.status))
        .bind(codebase.total_files as i32)
        .bind(codebase.processed_files as i32)
        .bind(&codebase.primary_language)
        .bind(&codebase.languages)
        .bind(codebase.size_bytes as i64)
        .bind(&codebase.error_message)
        .bind(&codebase.workflow_id)
        .bind(codebase.secrets_detected as i32)
        .bind(codebase.created_at)
        .bind(codebase.updated_at)
        .bind(&codebase.storage_path)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::ExternalService { service: "postgres", message: e.to_string() })?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Codebase>, AppError> {
        let row = sqlx::query("SELECT * FROM codebases WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::ExternalService { service: "postgres", message: e.to_string() })?;
        Ok(row.map(|r| row_to_codebase(&r)))
    }

    pub async fn list(&self, page: u32, limit: u32) -> Result<(Vec<Codebase>, u64), AppError> {
        let offset = (page.saturating_sub(1) as i64) * limit as i64;
        let rows = sqlx::query("SELECT * FROM codebases ORDER BY created_at DESC LIMIT $1 OFFSET $2")
            .bind(limit as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::ExternalService { service: "postgres", message: e.to_string() })?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM codebases")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::ExternalService { service: "postgres", message: e.to_string() })?;
        Ok((rows.iter().map(row_to_codebase).collect(), total as u64))
    }

    /// Mirrors workflow status into the Codebase row; called on every stage
    /// transition.
    pub async fn update_codebase_status(
        &self,
        id: Uuid,
        status: CodebaseStatus,
        processed_files: u32,
        total_files: u32,
        error_message: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE codebases
            SET status = $2, processed_files = $3, total_files = $4,
                error_message = $5, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status_str(status))
        .bind(processed_files as i32)
        .bind(total_files as i32)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::ExternalService { service: "postgres", message: e.to_string() })?;
        Ok(())
    }

    pub async fn update_languages_and_secrets(
        &self,
        id: Uuid,
        primary_language: Option<&str>,
        languages: &[String],
        size_bytes: u64,
        secrets_detected: u32,
        storage_path: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE codebases
            SET primary_language = $2, languages = $3, size_bytes = $4,
                secrets_detected = $5, storage_path = $6, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(primary_language)
        .bind(languages)
        .bind(size_bytes as i64)
        .bind(secrets_detected as i32)
        .bind(storage_path)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::ExternalService { service: "postgres", message: e.to_string() })?;
        Ok(())
    }

    /// Cascading delete target for the Codebase row itself — chunks,
    /// sessions, and the stored blob are removed by the caller via the
    /// vector index, session store, and filesystem respectively.
    pub async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM codebases WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::ExternalService { service: "postgres", message: e.to_string() })?;
        Ok(result.rows_affected() > 0)
    }
}

fn source_kind_str(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Archive => "archive",
        SourceKind::RemoteUrl => "remote-url",
    }
}

fn status_str(status: CodebaseStatus) -> &'static str {
    match status {
        CodebaseStatus::Queued => "queued",
        CodebaseStatus::Processing => "processing",
        CodebaseStatus::Completed => "completed",
        CodebaseStatus::Failed => "failed",
    }
}

fn row_to_codebase(row: &sqlx::postgres::PgRow) -> Codebase {
    let source_kind = match row.get::<String, _>("source_kind").as_str() {
        "remote-url" => SourceKind::RemoteUrl,
        _ => SourceKind::Archive,
    };
    let status = match row.get::<String, _>("status").as_str() {
        "processing" => CodebaseStatus::Processing,
        "completed" => CodebaseStatus::Completed,
        "failed" => CodebaseStatus::Failed,
        _ => CodebaseStatus::Queued,
    };
    Codebase {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        source_kind,
        source_locator: row.get("source_locator"),
        status,
        total_files: row.get::<i32, _>("total_files") as u32,
        processed_files: row.get::<i32, _>("processed_files") as u32,
        primary_language: row.get("primary_language"),
        languages: row.get("languages"),
        size_bytes: row.get::<i64, _>("size_bytes") as u64,
        error_message: row.get("error_message"),
        workflow_id: row.get("workflow_id"),
        secrets_detected: row.get::<i32, _>("secrets_detected") as u32,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        storage_path: row.get("storage_path"),
    }
}
