//! Node 5 — Validate.
//!
//! Computes citation verification (file + ±5 line-span overlap), potential-
//! hallucination detection (declared identifiers absent from any retrieved
//! chunk), a Jaccard-like context-alignment score, and the weighted overall
//! score.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::state::{CitationCheck, ValidationResults};
use super::state::AgentState;

const LINE_TOLERANCE: u32 = 5;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "to", "of", "in",
        "on", "at", "for", "with", "and", "or", "but", "this", "that", "it", "as", "by", "from",
        "if", "not", "do", "does", "did", "can", "will", "would", "should", "could", "has",
        "have", "had", "i", "you", "he", "she", "they", "we", "what", "how", "which", "when",
        "where", "why",
    ]
    .into_iter()
    .collect()
});

static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[a-zA-Z0-9_+-]*\n([\s\S]*?)```").unwrap());
static FUNCTION_DECL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:fn|def|function)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());
static CLASS_DECL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:class|struct|interface|trait)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());
static CONST_DECL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:const|let|var)\s+([A-Za-z_][A-Za-z0-9_]*)\s*=").unwrap());

fn verify_citations(state: &AgentState) -> Vec<CitationCheck> {
    state
        .sources
        .iter()
        .map(|source| {
            let verified = state.retrieved_chunks.iter().any(|chunk| {
                let Some(path) = chunk.metadata.get("file_path") else { return false };
                if path != &source.file_path {
                    return false;
                }
                let (Some(start), Some(end)) = (
                    chunk.metadata.get("line_start").and_then(|s| s.parse::<u32>().ok()),
                    chunk.metadata.get("line_end").and_then(|s| s.parse::<u32>().ok()),
                ) else {
                    return false;
                };
                let lo = start.saturating_sub(LINE_TOLERANCE);
                let hi = end + LINE_TOLERANCE;
                source.line_start <= hi && source.line_end >= lo
            });
            CitationCheck { source: source.clone(), verified }
        })
        .collect()
}

/// Declared identifiers in fenced code blocks that never appear verbatim in
/// any retrieved chunk's content — a cheap proxy for invented symbols.
fn detect_hallucinations(response: &str, retrieved_chunks: &[crate::vector_index::ScoredChunk]) -> Vec<String> {
    let mut identifiers = HashSet::new();
    for block in FENCE_RE.captures_iter(response) {
        let code = &block[1];
        for re in [&*FUNCTION_DECL_RE, &*CLASS_DECL_RE, &*CONST_DECL_RE] {
            for cap in re.captures_iter(code) {
                identifiers.insert(cap[1].to_string());
            }
        }
    }

    identifiers
        .into_iter()
        .filter(|ident| !retrieved_chunks.iter().any(|c| c.content.contains(ident.as_str())))
        .collect()
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(w.as_str()))
        .collect()
}

fn context_alignment(response: &str, context: &str) -> f32 {
    let response_words = tokenize(response);
    let context_words = tokenize(context);
    if response_words.is_empty() || context_words.is_empty() {
        return 0.0;
    }
    let intersection = response_words.intersection(&context_words).count();
    let union = response_words.union(&context_words).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

pub fn run(state: &mut AgentState) {
    let citations = verify_citations(state);
    let citation_accuracy = if citations.is_empty() {
        1.0
    } else {
        citations.iter().filter(|c| c.verified).count() as f32 / citations.len() as f32
    };

    let hallucinated_identifiers = detect_hallucinations(&state.response, &state.retrieved_chunks);
    let alignment = context_alignment(&state.response, &state.context);

    let overall_score = 0.4 * citation_accuracy
        + 0.3 * alignment
        + 0.3 * (1.0 - (0.1 * hallucinated_identifiers.len() as f32).min(1.0));

    state.validation_results = Some(ValidationResults {
        citations,
        citation_accuracy,
        hallucinated_identifiers,
        context_alignment: alignment,
        overall_score,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;
    use crate::vector_index::ScoredChunk;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn chunk(path: &str, start: u32, end: u32, content: &str) -> ScoredChunk {
        let mut metadata = HashMap::new();
        metadata.insert("file_path".to_string(), path.to_string());
        metadata.insert("line_start".to_string(), start.to_string());
        metadata.insert("line_end".to_string(), end.to_string());
        ScoredChunk { chunk_id: Uuid::new_v4(), content: content.to_string(), metadata, score: 1.0 }
    }

    #[test]
    fn citation_within_tolerance_is_verified() {
        let mut state = AgentState::new(Uuid::new_v4(), None, "q".to_string());
        state.retrieved_chunks = vec![chunk("a.py", 10, 20, "def f(): pass")];
        state.sources = vec![Source { file_path: "a.py".into(), line_start: 22, line_end: 25, snippet: String::new() }];
        run(&mut state);
        let results = state.validation_results.unwrap();
        assert_eq!(results.citation_accuracy, 1.0);
        assert!(results.citations[0].verified);
    }

    #[test]
    fn citation_outside_tolerance_is_unverified() {
        let mut state = AgentState::new(Uuid::new_v4(), None, "q".to_string());
        state.retrieved_chunks = vec![chunk("a.py", 10, 20, "def f(): pass")];
        state.sources = vec![Source { file_path: "a.py".into(), line_start: 100, line_end: 110, snippet: String::new() }];
        run(&mut state);
        let results = state.validation_results.unwrap();
        assert_eq!(results.citation_accuracy, 0.0);
    }

    #[test]
    fn hallucinated_identifier_is_flagged() {
        let mut state = AgentState::new(Uuid::new_v4(), None, "q".to_string());
        state.retrieved_chunks = vec![chunk("a.py", 1, 2, "def real_function(): pass")];
        state.response = "Here is the code:\n```python\ndef made_up_function():\n    pass\n```".to_string();
        run(&mut state);
        let results = state.validation_results.unwrap();
        assert!(results.hallucinated_identifiers.contains(&"made_up_function".to_string()));
        assert!(!results.hallucinated_identifiers.contains(&"real_function".to_string()));
    }

    #[test]
    fn no_sources_yields_perfect_citation_accuracy() {
        let mut state = AgentState::new(Uuid::new_v4(), None, "q".to_string());
        run(&mut state);
        assert_eq!(state.validation_results.unwrap().citation_accuracy, 1.0);
    }

    #[test]
    fn context_alignment_rewards_shared_vocabulary() {
        let response = "the authenticate function checks credentials";
        let context = "function authenticate checks user credentials against the database";
        let score = context_alignment(response, context);
        assert!(score > 0.0 && score <= 1.0);
    }
}
