//! `AgentState` — a fixed struct with explicit optional fields per stage,
//! not a dynamic record. Each pipeline node is a linear `State -> State`
//! transformation over it.

use uuid::Uuid;

use crate::model::{Message, Source};
use crate::vector_index::ScoredChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentFamily {
    CodeUnderstanding,
    BugFinding,
    Architecture,
    Implementation,
    Comparison,
    Location,
    Documentation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Default)]
pub struct Entities {
    pub file_paths: Vec<String>,
    pub function_names: Vec<String>,
    pub class_names: Vec<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub intent: IntentFamily,
    pub entities: Entities,
    pub is_multi_part: bool,
    pub has_external_context: bool,
    pub complexity: Complexity,
}

#[derive(Debug, Clone)]
pub struct CitationCheck {
    pub source: Source,
    pub verified: bool,
}

#[derive(Debug, Clone)]
pub struct ValidationResults {
    pub citations: Vec<CitationCheck>,
    pub citation_accuracy: f32,
    pub hallucinated_identifiers: Vec<String>,
    pub context_alignment: f32,
    pub overall_score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    UserInput,
    Retrieval,
    RateLimit,
    LlmService,
    Timeout,
    Network,
    Authentication,
    Resource,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ErrorMetadata {
    pub category: ErrorCategory,
    pub user_message: String,
    pub recovery_suggestion: String,
    pub technical_detail: String,
}

/// Carried across the five pipeline nodes. Every field past `query` is
/// populated by exactly one node and never mutated by a later one, except
/// `response` (accumulated token-by-token in generate).
pub struct AgentState {
    pub codebase_id: Uuid,
    pub session_id: Option<Uuid>,
    pub query: String,

    pub query_analysis: Option<QueryAnalysis>,
    pub session_history: Vec<Message>,

    pub retrieved_chunks: Vec<ScoredChunk>,
    pub sources: Vec<Source>,

    pub context: String,

    pub response: String,

    pub validation_results: Option<ValidationResults>,
    pub error_metadata: Option<ErrorMetadata>,
}

impl AgentState {
    pub fn new(codebase_id: Uuid, session_id: Option<Uuid>, query: String) -> Self {
        AgentState {
            codebase_id,
            session_id,
            query,
            query_analysis: None,
            session_history: Vec::new(),
            retrieved_chunks: Vec::new(),
            sources: Vec::new(),
            context: String::new(),
            response: String::new(),
            validation_results: None,
            error_metadata: None,
        }
    }

    pub fn failed(&self) -> bool {
        self.error_metadata.is_some()
    }
}
