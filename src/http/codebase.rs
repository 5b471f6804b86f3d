//! Codebase lifecycle endpoints: upload (kicks off ingestion), list, get,
//! status, delete. State extraction, typed query structs, and
//! `(StatusCode, Json)` error tuples throughout; multipart upload is built
//! from axum's own `Multipart` extractor.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::acquire::Source;
use crate::error::AppError;
use crate::model::{Codebase, SourceKind};

use super::AppContext;

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_page() -> u32 {
    1
}
fn default_limit() -> u32 {
    20
}

#[derive(Serialize)]
struct UploadResponse {
    codebase_id: Uuid,
    status: &'static str,
    workflow_id: String,
}

/// `POST /api/v1/codebase/upload` — multipart form with `name`,
/// `description?`, and exactly one of `file` or `repository_url`.
pub async fn upload(State(ctx): State<AppContext>, mut multipart: Multipart) -> Result<impl IntoResponse, AppError> {
    let mut name: Option<String> = None;
    let mut description: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut repository_url: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "name" => {
                name = Some(field.text().await.map_err(|e| AppError::Validation(e.to_string()))?);
            }
            "description" => {
                description = Some(field.text().await.map_err(|e| AppError::Validation(e.to_string()))?);
            }
            "repository_url" => {
                repository_url = Some(field.text().await.map_err(|e| AppError::Validation(e.to_string()))?);
            }
            "file" => {
                let bytes = field.bytes().await.map_err(|e| AppError::Validation(e.to_string()))?;
                if bytes.len() as u64 > ctx.config.max_archive_size_bytes {
                    return Err(AppError::SizeExceeded);
                }
                file_bytes = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| AppError::Validation("missing required field 'name'".to_string()))?;

    let (source_kind, source_locator, source) = match (file_bytes, repository_url) {
        (Some(_), Some(_)) => {
            return Err(AppError::Validation(
                "provide exactly one of 'file' or 'repository_url', not both".to_string(),
            ));
        }
        (None, None) => {
            return Err(AppError::Validation(
                "provide exactly one of 'file' or 'repository_url'".to_string(),
            ));
        }
        (Some(bytes), None) => (SourceKind::Archive, None, Source::Archive(bytes)),
        (None, Some(url)) => (SourceKind::RemoteUrl, Some(url.clone()), Source::RemoteUrl(url)),
    };

    let mut codebase = Codebase::new(name, description, source_kind, source_locator);

    if let Source::Archive(bytes) = &source {
        let dir = std::path::Path::new(&ctx.config.storage_path);
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to create storage dir: {e}")))?;
        let path = dir.join(format!("{}.zip", codebase.id));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to persist upload: {e}")))?;
        codebase.storage_path = Some(path.to_string_lossy().into_owned());
    }

    ctx.db.insert(&codebase).await?;
    ctx.orchestrator.start(codebase.id, source).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse { codebase_id: codebase.id, status: "queued", workflow_id: codebase.workflow_id }),
    ))
}

#[derive(Serialize)]
struct ListResponse {
    codebases: Vec<Codebase>,
    total: u64,
    page: u32,
    limit: u32,
}

/// `GET /api/v1/codebase` — newest first, paginated.
pub async fn list(State(ctx): State<AppContext>, Query(q): Query<PageQuery>) -> Result<impl IntoResponse, AppError> {
    let (codebases, total) = ctx.db.list(q.page, q.limit).await?;
    Ok(Json(ListResponse { codebases, total, page: q.page, limit: q.limit }))
}

/// `GET /api/v1/codebase/{id}` — full metadata, 404 if unknown.
pub async fn get(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    let codebase = ctx
        .db
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("codebase {id} not found")))?;
    Ok(Json(codebase))
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    workflow: crate::orchestrator::workflow::WorkflowStatus,
}

/// `GET /api/v1/codebase/{id}/status` — live workflow status if the
/// ingestion is still in flight, else a status derived from the persisted
/// Codebase row (covers process restarts where the in-memory runtime state
/// is gone but the database still has the final outcome).
pub async fn status(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    let codebase = ctx
        .db
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("codebase {id} not found")))?;

    let workflow = match ctx.orchestrator.status(id).await {
        Some(status) => status,
        None => status_from_codebase(&codebase),
    };

    Ok(Json(StatusResponse { workflow }))
}

fn status_from_codebase(codebase: &Codebase) -> crate::orchestrator::workflow::WorkflowStatus {
    use crate::model::CodebaseStatus::*;
    let (step, progress) = match codebase.status {
        Queued => ("queued", 0.0),
        Processing => ("processing", 0.5),
        Completed => ("completed", 1.0),
        Failed => ("failed", 1.0),
    };
    crate::orchestrator::workflow::WorkflowStatus {
        step: step.to_string(),
        progress,
        files_processed: codebase.processed_files,
        files_total: codebase.total_files,
        chunks_created: 0,
        secrets_found: codebase.secrets_detected,
        summary: String::new(),
        message: codebase.error_message.clone().unwrap_or_else(|| step.to_string()),
        error: codebase.error_message.clone(),
    }
}

/// `DELETE /api/v1/codebase/{id}` — cascades to chunks, sessions, the
/// stored blob, and a running workflow (the delete-cascade
/// property).
pub async fn delete(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    let codebase = ctx
        .db
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("codebase {id} not found")))?;

    ctx.orchestrator.cancel(id).await;
    ctx.pipeline.vector_index.delete_by_codebase(id).await?;
    ctx.session_store.delete_all_for_codebase(id).await?;

    if let Some(path) = &codebase.storage_path {
        tokio::fs::remove_file(path).await.ok();
    }

    ctx.db.delete(id).await?;

    Ok(StatusCode::NO_CONTENT)
}
