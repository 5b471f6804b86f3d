//! C4 — Vector Index Adapter.
//!
//! A `VectorIndex` trait keeps the core from hardcoding a wire format; the
//! production adapter speaks to Qdrant via `qdrant-client`. An in-memory
//! flat-cosine adapter backs tests and local dev.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, ScrollPointsBuilder,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use uuid::Uuid;

use crate::error::AppError;
use crate::model::CodeChunk;

#[derive(Debug, Clone)]
pub struct IndexFilter {
    pub language: Option<String>,
    pub chunk_type: Option<String>,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, chunks: &[CodeChunk]) -> Result<(), AppError>;

    async fn query_raw(
        &self,
        embedding: &[f32],
        codebase_id: Uuid,
        top_k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<ScoredChunk>, AppError>;

    async fn delete_by_codebase(&self, codebase_id: Uuid) -> Result<(), AppError>;

    async fn health(&self) -> Result<(), AppError>;
}

/// Default-provided wrapper all callers should use instead of `query_raw`
/// directly — enforces top-k clamping and the mandatory codebase filter at
/// one call site rather than leaving it to each adapter.
pub async fn query(
    index: &dyn VectorIndex,
    embedding: &[f32],
    codebase_id: Uuid,
    requested_top_k: usize,
    max_top_k: usize,
    filter: Option<&IndexFilter>,
) -> Result<Vec<ScoredChunk>, AppError> {
    let top_k = requested_top_k.clamp(1, max_top_k.max(1));
    index.query_raw(embedding, codebase_id, top_k, filter).await
}

// ---------------------------------------------------------------------------
// Qdrant adapter
// ---------------------------------------------------------------------------

pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
}

impl QdrantIndex {
    pub fn new(url: &str, collection: &str) -> Result<Self, AppError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| AppError::ExternalService { service: "qdrant", message: e.to_string() })?;
        Ok(QdrantIndex { client, collection: collection.to_string() })
    }

    pub async fn ensure_collection(&self, dim: u64) -> Result<(), AppError> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| AppError::ExternalService { service: "qdrant", message: e.to_string() })?;
        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(VectorParamsBuilder::new(dim, Distance::Cosine)),
                )
                .await
                .map_err(|e| AppError::ExternalService {
                    service: "qdrant",
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}

fn codebase_filter(codebase_id: Uuid, extra: Option<&IndexFilter>) -> Filter {
    let mut conditions = vec![Condition::matches("codebase_id", codebase_id.to_string())];
    if let Some(f) = extra {
        if let Some(lang) = &f.language {
            conditions.push(Condition::matches("language", lang.clone()));
        }
        if let Some(kind) = &f.chunk_type {
            conditions.push(Condition::matches("chunk_type", kind.clone()));
        }
        if let Some(path) = &f.file_path {
            conditions.push(Condition::matches("file_path", path.clone()));
        }
    }
    Filter::must(conditions)
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn add(&self, chunks: &[CodeChunk]) -> Result<(), AppError> {
        let mut points = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let Some(embedding) = &chunk.embedding else {
                return Err(AppError::Validation(format!(
                    "chunk {} has no embedding — programming error",
                    chunk.id
                )));
            };
            let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
            for (k, v) in chunk.index_metadata() {
                payload.insert(k, v.into());
            }
            payload.insert("content".to_string(), chunk.content.clone().into());
            points.push(PointStruct::new(chunk.id.to_string(), embedding.clone(), payload));
        }
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points))
            .await
            .map_err(|e| AppError::ExternalService { service: "qdrant", message: e.to_string() })?;
        Ok(())
    }

    async fn query_raw(
        &self,
        embedding: &[f32],
        codebase_id: Uuid,
        top_k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        let search = SearchPointsBuilder::new(&self.collection, embedding.to_vec(), top_k as u64)
            .filter(codebase_filter(codebase_id, filter))
            .with_payload(true);
        let result = self
            .client
            .search_points(search)
            .await
            .map_err(|e| AppError::ExternalService { service: "qdrant", message: e.to_string() })?;

        let mut scored = Vec::with_capacity(result.result.len());
        for point in result.result {
            let chunk_id = match &point.id {
                Some(id) => id.to_string(),
                None => continue,
            };
            let Ok(chunk_id) = Uuid::parse_str(&chunk_id) else { continue };
            let mut metadata = HashMap::new();
            let mut content = String::new();
            for (k, v) in point.payload {
                if let Some(s) = v.as_str() {
                    if k == "content" {
                        content = s.to_string();
                    } else {
                        metadata.insert(k, s.to_string());
                    }
                }
            }
            scored.push(ScoredChunk { chunk_id, content, metadata, score: point.score });
        }
        Ok(scored)
    }

    async fn delete_by_codebase(&self, codebase_id: Uuid) -> Result<(), AppError> {
        let filter = Filter::must(vec![Condition::matches("codebase_id", codebase_id.to_string())]);
        self.client
            .delete_points(
                qdrant_client::qdrant::DeletePointsBuilder::new(&self.collection)
                    .points(qdrant_client::qdrant::PointsSelector::from(filter)),
            )
            .await
            .map_err(|e| AppError::ExternalService { service: "qdrant", message: e.to_string() })?;
        Ok(())
    }

    async fn health(&self) -> Result<(), AppError> {
        self.client
            .health_check()
            .await
            .map(|_| ())
            .map_err(|e| AppError::ExternalService { service: "qdrant", message: e.to_string() })
    }
}

// ---------------------------------------------------------------------------
// In-memory adapter — tests and the local-dev path
// ---------------------------------------------------------------------------

struct StoredPoint {
    codebase_id: Uuid,
    content: String,
    embedding: Vec<f32>,
    metadata: HashMap<String, String>,
}

#[derive(Default)]
pub struct InMemoryIndex {
    points: RwLock<HashMap<Uuid, StoredPoint>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn matches_filter(metadata: &HashMap<String, String>, filter: Option<&IndexFilter>) -> bool {
    let Some(f) = filter else { return true };
    if let Some(lang) = &f.language {
        if metadata.get("language") != Some(lang) {
            return false;
        }
    }
    if let Some(kind) = &f.chunk_type {
        if metadata.get("chunk_type") != Some(kind) {
            return false;
        }
    }
    if let Some(path) = &f.file_path {
        if metadata.get("file_path") != Some(path) {
            return false;
        }
    }
    true
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn add(&self, chunks: &[CodeChunk]) -> Result<(), AppError> {
        let mut points = self.points.write().unwrap();
        for chunk in chunks {
            let Some(embedding) = &chunk.embedding else {
                return Err(AppError::Validation(format!(
                    "chunk {} has no embedding — programming error",
                    chunk.id
                )));
            };
            points.insert(
                chunk.id,
                StoredPoint {
                    codebase_id: chunk.codebase_id,
                    content: chunk.content.clone(),
                    embedding: embedding.clone(),
                    metadata: chunk.index_metadata(),
                },
            );
        }
        Ok(())
    }

    async fn query_raw(
        &self,
        embedding: &[f32],
        codebase_id: Uuid,
        top_k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        let points = self.points.read().unwrap();
        let mut scored: Vec<ScoredChunk> = points
            .iter()
            .filter(|(_, p)| p.codebase_id == codebase_id && matches_filter(&p.metadata, filter))
            .map(|(id, p)| ScoredChunk {
                chunk_id: *id,
                content: p.content.clone(),
                metadata: p.metadata.clone(),
                score: cosine(embedding, &p.embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_by_codebase(&self, codebase_id: Uuid) -> Result<(), AppError> {
        let mut points = self.points.write().unwrap();
        points.retain(|_, p| p.codebase_id != codebase_id);
        Ok(())
    }

    async fn health(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with_embedding(codebase_id: Uuid, embedding: Vec<f32>) -> CodeChunk {
        CodeChunk {
            id: Uuid::new_v4(),
            codebase_id,
            file_path: "a.py".into(),
            line_start: 1,
            line_end: 2,
            content: "def f(): pass".into(),
            language: "python".into(),
            kind: crate::model::ChunkKind::Function,
            name: Some("f".into()),
            docstring: None,
            dependencies: None,
            parent_class: None,
            complexity: Some(1),
            embedding: Some(embedding),
            metadata: Default::default(),
            truncated: false,
        }
    }

    #[tokio::test]
    async fn add_rejects_chunk_without_embedding() {
        let index = InMemoryIndex::new();
        let mut chunk = chunk_with_embedding(Uuid::new_v4(), vec![1.0, 0.0]);
        chunk.embedding = None;
        let err = index.add(&[chunk]).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn query_is_scoped_by_codebase_id() {
        let index = InMemoryIndex::new();
        let cb_a = Uuid::new_v4();
        let cb_b = Uuid::new_v4();
        index.add(&[chunk_with_embedding(cb_a, vec![1.0, 0.0])]).await.unwrap();
        index.add(&[chunk_with_embedding(cb_b, vec![1.0, 0.0])]).await.unwrap();

        let results = query(&index, &[1.0, 0.0], cb_a, 10, 20, None).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn top_k_is_clamped() {
        let index = InMemoryIndex::new();
        let cb = Uuid::new_v4();
        for _ in 0..5 {
            index.add(&[chunk_with_embedding(cb, vec![1.0, 0.0])]).await.unwrap();
        }
        let results = query(&index, &[1.0, 0.0], cb, 1_000_000, 20, None).await.unwrap();
        assert!(results.len() <= 20);
        let results = query(&index, &[1.0, 0.0], cb, 0, 20, None).await.unwrap();
        assert!(!results.is_empty() && results.len() <= 20);
    }

    #[tokio::test]
    async fn delete_by_codebase_removes_only_that_codebase() {
        let index = InMemoryIndex::new();
        let cb_a = Uuid::new_v4();
        let cb_b = Uuid::new_v4();
        index.add(&[chunk_with_embedding(cb_a, vec![1.0, 0.0])]).await.unwrap();
        index.add(&[chunk_with_embedding(cb_b, vec![1.0, 0.0])]).await.unwrap();
        index.delete_by_codebase(cb_a).await.unwrap();
        assert!(query(&index, &[1.0, 0.0], cb_a, 10, 20, None).await.unwrap().is_empty());
        assert!(!query(&index, &[1.0, 0.0], cb_b, 10, 20, None).await.unwrap().is_empty());
    }
}
