//! Node 3 — Build context.
//!
//! Renders each retrieved chunk as `File: <path> (Lines A-B)` followed by a
//! language-fenced code block, joined by blank lines. Purely synchronous —
//! no suspension point, unlike the surrounding nodes.

use super::state::AgentState;

fn fence_lang(language: &str) -> &str {
    // Markdown fence hints; the chunk's stored language name already lines
    // up with the common fence identifiers for every language this service
    // parses (see `parse::ast::language_for_ext`).
    match language {
        "c" => "c",
        "cpp" => "cpp",
        other => other,
    }
}

pub fn run(state: &mut AgentState) {
    let mut blocks = Vec::with_capacity(state.retrieved_chunks.len());
    for chunk in &state.retrieved_chunks {
        let path = chunk.metadata.get("file_path").map(String::as_str).unwrap_or("unknown");
        let start = chunk.metadata.get("line_start").map(String::as_str).unwrap_or("?");
        let end = chunk.metadata.get("line_end").map(String::as_str).unwrap_or("?");
        let lang = chunk.metadata.get("language").map(String::as_str).unwrap_or("");
        blocks.push(format!(
            "File: {path} (Lines {start}-{end})\n```{fence}\n{content}\n```",
            fence = fence_lang(lang),
            content = chunk.content,
        ));
    }
    state.context = blocks.join("\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::ScoredChunk;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn chunk(path: &str, start: &str, end: &str, lang: &str, content: &str) -> ScoredChunk {
        let mut metadata = HashMap::new();
        metadata.insert("file_path".to_string(), path.to_string());
        metadata.insert("line_start".to_string(), start.to_string());
        metadata.insert("line_end".to_string(), end.to_string());
        metadata.insert("language".to_string(), lang.to_string());
        ScoredChunk { chunk_id: Uuid::new_v4(), content: content.to_string(), metadata, score: 1.0 }
    }

    #[test]
    fn renders_file_header_and_fenced_block() {
        let mut state = AgentState::new(Uuid::new_v4(), None, "q".to_string());
        state.retrieved_chunks = vec![chunk("src/a.py", "1", "4", "python", "def f(): pass")];
        run(&mut state);
        assert!(state.context.starts_with("File: src/a.py (Lines 1-4)\n```python\n"));
        assert!(state.context.contains("def f(): pass"));
    }

    #[test]
    fn multiple_chunks_are_joined_by_blank_line() {
        let mut state = AgentState::new(Uuid::new_v4(), None, "q".to_string());
        state.retrieved_chunks = vec![
            chunk("a.py", "1", "2", "python", "x = 1"),
            chunk("b.py", "3", "4", "python", "y = 2"),
        ];
        run(&mut state);
        assert!(state.context.contains("```\n\nFile: b.py"));
    }

    #[test]
    fn no_chunks_yields_empty_context() {
        let mut state = AgentState::new(Uuid::new_v4(), None, "q".to_string());
        run(&mut state);
        assert_eq!(state.context, "");
    }
}
