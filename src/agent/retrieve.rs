//! Node 2 — Retrieve.
//!
//! Embeds the query, calls C4 scoped to the codebase id with
//! `top_k = default_top_k`, and captures both the raw scored chunks and the
//! `Source` citation records the transport layer and validation node need.

use crate::embeddings::EmbeddingProvider;
use crate::error::AppError;
use crate::model::Source;
use crate::vector_index::{self, VectorIndex};

use super::state::AgentState;

const SNIPPET_MAX_CHARS: usize = 200;

fn truncate_snippet(content: &str) -> String {
    if content.chars().count() <= SNIPPET_MAX_CHARS {
        content.to_string()
    } else {
        content.chars().take(SNIPPET_MAX_CHARS).collect()
    }
}

pub async fn run(
    state: &mut AgentState,
    embeddings: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    default_top_k: usize,
    max_top_k: usize,
) -> Result<(), AppError> {
    let query_embedding = embeddings
        .embed(std::slice::from_ref(&state.query))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Query("embedding provider returned no vector for the query".to_string()))?;

    let chunks = vector_index::query(
        index,
        &query_embedding,
        state.codebase_id,
        default_top_k,
        max_top_k,
        None,
    )
    .await?;

    state.sources = chunks
        .iter()
        .filter_map(|chunk| {
            let file_path = chunk.metadata.get("file_path")?.clone();
            let line_start: u32 = chunk.metadata.get("line_start")?.parse().ok()?;
            let line_end: u32 = chunk.metadata.get("line_end")?.parse().ok()?;
            Some(Source { file_path, line_start, line_end, snippet: truncate_snippet(&chunk.content) })
        })
        .collect();
    state.retrieved_chunks = chunks;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_is_truncated_to_200_chars() {
        let long = "x".repeat(500);
        let snippet = truncate_snippet(&long);
        assert_eq!(snippet.chars().count(), SNIPPET_MAX_CHARS);
    }

    #[test]
    fn short_content_is_not_padded() {
        assert_eq!(truncate_snippet("short"), "short");
    }
}
