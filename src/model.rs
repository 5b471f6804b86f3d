//! Core data model: codebases, chunks, and chat sessions.
//!
//! These types are the wire format for the relational store, the vector
//! index metadata, and the HTTP/SSE surface alike — see `db.rs`,
//! `vector_index.rs`, and `api/` for where each gets serialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Codebase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Archive,
    RemoteUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodebaseStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl CodebaseStatus {
    /// Invariant (4): status transitions are monotonic forward through
    /// `queued -> processing -> (completed | failed)`. No backward transitions.
    pub fn can_transition_to(self, next: CodebaseStatus) -> bool {
        use CodebaseStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Codebase {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub source_kind: SourceKind,
    pub source_locator: Option<String>,
    pub status: CodebaseStatus,
    pub total_files: u32,
    pub processed_files: u32,
    pub primary_language: Option<String>,
    pub languages: Vec<String>,
    pub size_bytes: u64,
    pub error_message: Option<String>,
    pub workflow_id: String,
    pub secrets_detected: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub storage_path: Option<String>,
}

impl Codebase {
    pub fn new(
        name: String,
        description: Option<String>,
        source_kind: SourceKind,
        source_locator: Option<String>,
    ) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Codebase {
            id,
            name,
            description,
            source_kind,
            source_locator,
            status: CodebaseStatus::Queued,
            total_files: 0,
            processed_files: 0,
            primary_language: None,
            languages: Vec::new(),
            size_bytes: 0,
            error_message: None,
            workflow_id: format!("ingest-{id}"),
            secrets_detected: 0,
            created_at: now,
            updated_at: now,
            storage_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Code chunk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Function,
    Class,
    Method,
    Module,
    Import,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Class => "class",
            ChunkKind::Method => "method",
            ChunkKind::Module => "module",
            ChunkKind::Import => "import",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: Uuid,
    pub codebase_id: Uuid,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub content: String,
    pub language: String,
    pub kind: ChunkKind,
    pub name: Option<String>,
    pub docstring: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub parent_class: Option<String>,
    pub complexity: Option<u32>,
    /// `None` until the embedding stage runs; `VectorIndex::add` rejects chunks
    /// still missing this — no chunk is ever stored without its embedding.
    pub embedding: Option<Vec<f32>>,
    pub metadata: HashMap<String, String>,
    pub truncated: bool,
}

impl CodeChunk {
    /// Metadata carried alongside the vector in the index — everything except
    /// the embedding and the raw content, which the adapter stores separately.
    pub fn index_metadata(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("codebase_id".to_string(), self.codebase_id.to_string());
        m.insert("file_path".to_string(), self.file_path.clone());
        m.insert("line_start".to_string(), self.line_start.to_string());
        m.insert("line_end".to_string(), self.line_end.to_string());
        m.insert("language".to_string(), self.language.clone());
        m.insert("chunk_type".to_string(), self.kind.as_str().to_string());
        if let Some(name) = &self.name {
            m.insert("name".to_string(), name.clone());
        }
        if let Some(parent) = &self.parent_class {
            m.insert("parent_class".to_string(), parent.clone());
        }
        m
    }
}

// ---------------------------------------------------------------------------
// Session / chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Source>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieved_chunk_ids: Option<Vec<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub codebase_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub message_count: u32,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    pub fn new(codebase_id: Uuid) -> Self {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            codebase_id,
            created_at: now,
            last_active: now,
            message_count: 0,
            messages: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        use CodebaseStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(Completed));
    }

    #[test]
    fn new_codebase_starts_queued_with_derived_workflow_id() {
        let cb = Codebase::new("demo".into(), None, SourceKind::Archive, None);
        assert_eq!(cb.status, CodebaseStatus::Queued);
        assert_eq!(cb.workflow_id, format!("ingest-{}", cb.id));
        assert_eq!(cb.processed_files, 0);
    }
}
