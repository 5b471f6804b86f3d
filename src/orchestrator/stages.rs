//! The five ingestion stages run strictly in order for a single
//! codebase: Validate -> Acquire -> Parse+Redact+Chunk -> Secret-scan
//! report -> Embed+Index, each one wrapped in a `tracing` span.

use std::sync::Arc;

use rayon::prelude::*;
use uuid::Uuid;

use crate::acquire::{self, AcquiredMap, Source};
use crate::config::Config;
use crate::db::CodebaseRepository;
use crate::embeddings::EmbeddingProvider;
use crate::error::AppError;
use crate::model::{ChunkKind, CodeChunk, CodebaseStatus};
use crate::parse::{self, ChunkerConfig};
use crate::secrets;
use crate::vector_index::VectorIndex;

use super::workflow::{CancelToken, RetryPolicy, StatusSink, WorkflowStatus};

pub struct StageContext {
    pub db: Arc<CodebaseRepository>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub config: Arc<Config>,
}

/// Runs the full pipeline for one codebase, publishing a `WorkflowStatus`
/// checkpoint after every stage. Never panics out of the spawned task:
/// every failure is folded into a `Failed` status and a `codebases.status`
/// update instead.
pub async fn run_ingestion(
    ctx: StageContext,
    codebase_id: Uuid,
    source: Source,
    status: Arc<dyn StatusSink>,
    cancel: CancelToken,
) {
    crate::metrics::record_ingestion_started();
    if let Err(err) = run_ingestion_inner(&ctx, codebase_id, source, &status, &cancel).await {
        tracing::error!(codebase_id = %codebase_id, error = %err, "ingestion failed");
        crate::metrics::record_ingestion_failed();
        let message = crate::error::sanitize(&err.to_string());
        let _ = ctx
            .db
            .update_codebase_status(codebase_id, CodebaseStatus::Failed, 0, 0, Some(&message))
            .await;
        status
            .publish(WorkflowStatus {
                step: "failed".to_string(),
                progress: 1.0,
                error: Some(message),
                ..Default::default()
            })
            .await;
    }
}

async fn run_ingestion_inner(
    ctx: &StageContext,
    codebase_id: Uuid,
    source: Source,
    status: &Arc<dyn StatusSink>,
    cancel: &CancelToken,
) -> Result<(), AppError> {
    // --- Validate -----------------------------------------------------
    ctx.db
        .update_codebase_status(codebase_id, CodebaseStatus::Processing, 0, 0, None)
        .await?;
    status
        .publish(WorkflowStatus { step: "validating".to_string(), progress: 0.1, ..Default::default() })
        .await;
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    // --- Acquire --------------------------------------------------------
    status
        .publish(WorkflowStatus { step: "acquiring".to_string(), progress: 0.15, ..Default::default() })
        .await;
    let max_bytes = ctx.config.max_archive_size_bytes;
    let acquired: AcquiredMap =
        tokio::task::spawn_blocking(move || acquire::acquire(codebase_id, source, max_bytes))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))??;
    let total_files = acquired.len() as u32;
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    // --- Parse + Redact + Chunk ------------------------------------------
    status
        .publish(WorkflowStatus {
            step: "chunking".to_string(),
            progress: 0.3,
            files_total: total_files,
            ..Default::default()
        })
        .await;

    let chunker_config =
        ChunkerConfig { min_tokens: ctx.config.chunk_min_tokens, max_tokens: ctx.config.chunk_max_tokens };
    let enable_secret_detection = ctx.config.enable_secret_detection;
    let max_file_size_bytes = ctx.config.max_file_size_bytes;

    let files: Vec<(String, String)> =
        acquired.into_iter().map(|(path, file)| (path, file.content)).collect();

    let (chunks, secrets_found, languages, size_bytes): (Vec<CodeChunk>, u32, Vec<String>, u64) =
        tokio::task::spawn_blocking(move || {
            let per_file: Vec<(Vec<CodeChunk>, usize, Option<String>, u64)> = files
                .par_iter()
                .map(|(path, content)| {
                    let (content, scan) = if enable_secret_detection {
                        secrets::redact(content, max_file_size_bytes)
                    } else {
                        (content.clone(), secrets::SecretScanResult::default())
                    };
                    let chunks = parse::chunk_file(codebase_id, path, &content, &chunker_config);
                    let language = chunks.first().map(|c| c.language.clone());
                    (chunks, scan.total_count, language, content.len() as u64)
                })
                .collect();

            let mut all_chunks = Vec::new();
            let mut secrets_found = 0usize;
            let mut languages: Vec<String> = Vec::new();
            let mut size_bytes = 0u64;
            for (chunks, count, language, bytes) in per_file {
                all_chunks.extend(chunks);
                secrets_found += count;
                size_bytes += bytes;
                if let Some(lang) = language {
                    if !languages.contains(&lang) {
                        languages.push(lang);
                    }
                }
            }
            all_chunks.sort_by(|a, b| (a.file_path.as_str(), a.line_start).cmp(&(b.file_path.as_str(), b.line_start)));
            (all_chunks, secrets_found as u32, languages, size_bytes)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    status
        .publish(WorkflowStatus {
            step: "chunking".to_string(),
            progress: 0.5,
            files_total: total_files,
            chunks_created: chunks.len() as u32,
            secrets_found,
            ..Default::default()
        })
        .await;

    let primary_language = most_common_language(&chunks);
    ctx.db
        .update_languages_and_secrets(
            codebase_id,
            primary_language.as_deref(),
            &languages,
            size_bytes,
            secrets_found,
            None,
        )
        .await?;

    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    // --- Secret-scan report ----------------------------------------------
    status
        .publish(WorkflowStatus {
            step: "secret_scan_complete".to_string(),
            progress: 0.6,
            files_total: total_files,
            chunks_created: chunks.len() as u32,
            secrets_found,
            ..Default::default()
        })
        .await;
    if secrets_found > 0 {
        tracing::warn!(codebase_id = %codebase_id, count = secrets_found, "redacted secrets before embedding");
    }

    // --- Embed + Index ----------------------------------------------------
    let retry = RetryPolicy::from_config(&ctx.config);
    let batch_size = ctx.config.embedding_batch_size.max(1);
    let mut embedded_chunks = chunks;
    let total_batches = embedded_chunks.len().div_ceil(batch_size).max(1);

    for (batch_idx, batch) in embedded_chunks.chunks_mut(batch_size).enumerate() {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let embeddings_client = ctx.embeddings.clone();
        let started = std::time::Instant::now();
        let vectors = retry.run(|| {
            let embeddings_client = embeddings_client.clone();
            let texts = texts.clone();
            async move { embeddings_client.embed(&texts).await }
        }).await?;
        crate::metrics::record_embedding_call(started.elapsed().as_secs_f64());

        if vectors.len() != batch.len() {
            return Err(AppError::CodebaseProcessing(
                "embedding provider returned a mismatched vector count".to_string(),
            ));
        }
        for (chunk, vector) in batch.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
        }

        let index = ctx.vector_index.clone();
        let to_add = batch.to_vec();
        let started = std::time::Instant::now();
        retry.run(|| {
            let index = index.clone();
            let to_add = to_add.clone();
            async move { index.add(&to_add).await }
        }).await?;
        crate::metrics::record_vector_index_call(started.elapsed().as_secs_f64());

        status
            .publish(WorkflowStatus {
                step: "embedding".to_string(),
                progress: 0.6 + 0.3 * ((batch_idx + 1) as f32 / total_batches as f32),
                files_processed: total_files,
                files_total: total_files,
                chunks_created: embedded_chunks.len() as u32,
                secrets_found,
                ..Default::default()
            })
            .await;

        if batch_idx + 1 < total_batches {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }

    ctx.db
        .update_codebase_status(codebase_id, CodebaseStatus::Completed, total_files, total_files, None)
        .await?;
    crate::metrics::record_ingestion_completed(embedded_chunks.len() as u64, secrets_found as u64);

    status
        .publish(WorkflowStatus {
            step: "completed".to_string(),
            progress: 1.0,
            files_processed: total_files,
            files_total: total_files,
            chunks_created: embedded_chunks.len() as u32,
            secrets_found,
            summary: format!(
                "{} files, {} chunks, {} secrets redacted",
                total_files,
                embedded_chunks.len(),
                secrets_found
            ),
            message: "ingestion complete".to_string(),
            error: None,
        })
        .await;
    Ok(())
}

fn most_common_language(chunks: &[CodeChunk]) -> Option<String> {
    use std::collections::HashMap;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for chunk in chunks {
        *counts.entry(chunk.language.as_str()).or_insert(0) += 1;
    }
    counts.into_iter().max_by_key(|(_, n)| *n).map(|(lang, _)| lang.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_common_language_picks_the_majority() {
        let mut chunks = Vec::new();
        for lang in ["python", "python", "rust"] {
            chunks.push(CodeChunk {
                id: Uuid::new_v4(),
                codebase_id: Uuid::new_v4(),
                file_path: "a".into(),
                line_start: 1,
                line_end: 2,
                content: String::new(),
                language: lang.to_string(),
                kind: ChunkKind::Function,
                name: None,
                docstring: None,
                dependencies: None,
                parent_class: None,
                complexity: None,
                embedding: None,
                metadata: Default::default(),
                truncated: false,
            });
        }
        assert_eq!(most_common_language(&chunks), Some("python".to_string()));
    }
}
