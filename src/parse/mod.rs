//! C2 — Code Parser & Chunker.
//!
//! Symbol extraction reuses `ast::parse_file`'s tree-sitter walk; the chunk
//! emission rules here (size-based function/class chunking, import
//! collapsing, complexity scoring) run against the resulting `FileAst`.

pub mod ast;

use uuid::Uuid;

use crate::model::{ChunkKind, CodeChunk};
use ast::{SymbolKind, Symbol};

pub struct ChunkerConfig {
    pub min_tokens: usize,
    pub max_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig { min_tokens: 50, max_tokens: 1024 }
    }
}

/// Rough token approximation: content length / 4, matching the contract's
/// stated heuristic.
fn approx_tokens(content: &str) -> usize {
    content.len() / 4
}

fn line_span<'a>(content: &'a str, start_line: usize, end_line: usize) -> &'a str {
    let start_byte = content
        .split_inclusive('\n')
        .take(start_line.saturating_sub(1))
        .map(|l| l.len())
        .sum::<usize>();
    let end_byte = content
        .split_inclusive('\n')
        .take(end_line)
        .map(|l| l.len())
        .sum::<usize>()
        .min(content.len());
    if start_byte >= end_byte || end_byte > content.len() {
        ""
    } else {
        &content[start_byte..end_byte]
    }
}

/// Truncate at the last newline inside `max_tokens * 4` bytes, appending a
/// truncation tail, matching the class-chunking rule.
fn truncate_class_body(body: &str, max_tokens: usize) -> (String, bool) {
    let byte_cap = max_tokens * 4;
    if body.len() <= byte_cap {
        return (body.to_string(), false);
    }
    let boundary = body[..byte_cap.min(body.len())]
        .rfind('\n')
        .unwrap_or(byte_cap.min(body.len()));
    let mut truncated = body[..boundary].to_string();
    truncated.push_str("\n# … (truncated)");
    (truncated, true)
}

/// Parse and chunk a single file. Returns zero chunks (not an error) when
/// the language is unsupported or the grammar fails to parse — the failure
/// model requires the pipeline to continue past any one file.
pub fn chunk_file(
    codebase_id: Uuid,
    file_path: &str,
    content: &str,
    config: &ChunkerConfig,
) -> Vec<CodeChunk> {
    let ext = file_path.rsplit('.').next().unwrap_or("");
    let Some((file_ast, language)) = ast::parse_file(content, ext) else {
        return Vec::new();
    };

    let mut chunks = Vec::new();

    let functions: Vec<&Symbol> =
        file_ast.symbols.iter().filter(|s| s.kind == SymbolKind::Function).collect();
    let classes: Vec<&Symbol> =
        file_ast.symbols.iter().filter(|s| s.kind == SymbolKind::Class).collect();
    let imports: Vec<&Symbol> =
        file_ast.symbols.iter().filter(|s| s.kind == SymbolKind::Import).collect();

    for f in &functions {
        let body = line_span(content, f.start_line, f.end_line);
        if approx_tokens(body) < config.min_tokens {
            continue;
        }
        chunks.push(CodeChunk {
            id: Uuid::new_v4(),
            codebase_id,
            file_path: file_path.to_string(),
            line_start: f.start_line as u32,
            line_end: f.end_line as u32,
            content: body.to_string(),
            language: language.to_string(),
            kind: if f.parent_name.is_some() { ChunkKind::Method } else { ChunkKind::Function },
            name: f.name.clone(),
            docstring: None,
            dependencies: None,
            parent_class: f.parent_name.clone(),
            complexity: None,
            embedding: None,
            metadata: Default::default(),
            truncated: false,
        });
    }

    for c in &classes {
        let body = line_span(content, c.start_line, c.end_line);
        let fits = approx_tokens(body) <= config.max_tokens;
        let (chunk_content, truncated) =
            if fits { (body.to_string(), false) } else { truncate_class_body(body, config.max_tokens) };
        chunks.push(CodeChunk {
            id: Uuid::new_v4(),
            codebase_id,
            file_path: file_path.to_string(),
            line_start: c.start_line as u32,
            line_end: c.end_line as u32,
            content: chunk_content,
            language: language.to_string(),
            kind: ChunkKind::Class,
            name: c.name.clone(),
            docstring: None,
            dependencies: None,
            parent_class: None,
            complexity: None,
            embedding: None,
            metadata: Default::default(),
            truncated,
        });
    }

    if let (Some(first), Some(last)) = (imports.first(), imports.last()) {
        let body = line_span(content, first.start_line, last.end_line);
        chunks.push(CodeChunk {
            id: Uuid::new_v4(),
            codebase_id,
            file_path: file_path.to_string(),
            line_start: first.start_line as u32,
            line_end: last.end_line as u32,
            content: body.to_string(),
            language: language.to_string(),
            kind: ChunkKind::Import,
            name: None,
            docstring: None,
            dependencies: Some(
                imports
                    .iter()
                    .filter_map(|s| s.name.clone())
                    .collect(),
            ),
            parent_class: None,
            complexity: None,
            embedding: None,
            metadata: Default::default(),
            truncated: false,
        });
    }

    let complexity = (functions.len() + 2 * classes.len()) as u32;
    for chunk in &mut chunks {
        chunk.complexity = Some(complexity);
    }

    // Deterministic emission order regardless of parallel chunking upstream.
    chunks.sort_by(|a, b| (a.file_path.as_str(), a.line_start).cmp(&(b.file_path.as_str(), b.line_start)));
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_function_is_dropped() {
        let cb = Uuid::new_v4();
        let src = "fn f() { 1 }\n";
        let chunks = chunk_file(cb, "main.rs", src, &ChunkerConfig::default());
        assert!(chunks.iter().all(|c| c.kind != ChunkKind::Function));
    }

    #[test]
    fn function_meeting_token_threshold_becomes_a_chunk() {
        let cb = Uuid::new_v4();
        let body = "x".repeat(64);
        let src = format!("fn long_function() {{\n    let s = \"{body}\";\n}}\n");
        let chunks = chunk_file(cb, "main.rs", &src, &ChunkerConfig::default());
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::Function && c.name.as_deref() == Some("long_function")));
    }

    #[test]
    fn imports_collapse_into_one_chunk() {
        let cb = Uuid::new_v4();
        let src = "import os\nimport sys\nfrom typing import Any\n\ndef f():\n    return os.getcwd() + sys.argv[0] + str(Any)\n";
        let chunks = chunk_file(cb, "m.py", src, &ChunkerConfig::default());
        let import_chunks: Vec<_> = chunks.iter().filter(|c| c.kind == ChunkKind::Import).collect();
        assert_eq!(import_chunks.len(), 1);
        assert_eq!(import_chunks[0].line_start, 1);
    }

    #[test]
    fn unsupported_language_yields_no_chunks() {
        let cb = Uuid::new_v4();
        let chunks = chunk_file(cb, "readme.md", "# hello\n", &ChunkerConfig::default());
        assert!(chunks.is_empty());
    }

    #[test]
    fn complexity_counts_functions_and_classes() {
        let cb = Uuid::new_v4();
        let body = "x".repeat(64);
        let src = format!(
            "struct A;\nstruct B;\n\nfn one() {{\n    let s = \"{body}\";\n}}\n"
        );
        let chunks = chunk_file(cb, "m.rs", &src, &ChunkerConfig::default());
        assert!(chunks.iter().all(|c| c.complexity == Some(1 + 2 * 2)));
    }
}
