//! Node 1 — Analyze.
//!
//! Classifies query intent via pattern counts across seven intent families,
//! extracts entities, flags multi-part/external-context signals, and scores
//! complexity, against a small static keyword table per family built from
//! precompiled `regex::Regex` statics (same idiom as `secrets.rs`/`ast.rs`).

use once_cell::sync::Lazy;
use regex::Regex;

use super::state::{AgentState, Complexity, Entities, IntentFamily, QueryAnalysis};
use crate::error::AppError;
use crate::session_store::SessionStore;

struct IntentKeywords {
    family: IntentFamily,
    words: &'static [&'static str],
}

const INTENT_TABLE: &[IntentKeywords] = &[
    IntentKeywords {
        family: IntentFamily::BugFinding,
        words: &["bug", "error", "fail", "crash", "broken", "fix", "wrong", "incorrect", "exception"],
    },
    IntentKeywords {
        family: IntentFamily::Architecture,
        words: &["architecture", "design", "structure", "module", "component", "layer", "pattern", "overview"],
    },
    IntentKeywords {
        family: IntentFamily::Implementation,
        words: &["implement", "add", "create", "write", "build", "refactor", "change", "modify"],
    },
    IntentKeywords {
        family: IntentFamily::Comparison,
        words: &["compare", "difference", "versus", "vs", "better", "instead of", "rather than"],
    },
    IntentKeywords {
        family: IntentFamily::Location,
        words: &["where", "find", "locate", "which file", "which function"],
    },
    IntentKeywords {
        family: IntentFamily::Documentation,
        words: &["document", "docstring", "comment", "explain", "describe", "readme"],
    },
    IntentKeywords {
        family: IntentFamily::CodeUnderstanding,
        words: &["how does", "what does", "understand", "works", "behavior", "logic"],
    },
];

const TECHNICAL_KEYWORDS: &[&str] = &[
    "function", "class", "method", "api", "database", "query", "async", "thread", "lock",
    "cache", "index", "schema", "endpoint", "middleware", "authentication", "token", "session",
];

const EXTERNAL_CONTEXT_MARKERS: &[&str] = &[
    "documentation", "online", "npm", "pip", "crates.io", "stack overflow", "rfc", "spec",
    "standard library", "third-party", "external library",
];

static FILE_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[\w./-]+\.(?:rs|py|js|ts|tsx|jsx|go|java|c|h|cpp|hpp)\b").unwrap());
static FUNCTION_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([a-z_][a-z0-9_]*)\s*\(\)").unwrap());
static CLASS_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Z][a-zA-Z0-9]*)\b").unwrap());

fn classify_intent(query_lower: &str) -> IntentFamily {
    let mut best = IntentFamily::CodeUnderstanding;
    let mut best_count = 0usize;
    for entry in INTENT_TABLE {
        let count = entry.words.iter().filter(|w| query_lower.contains(*w)).count();
        if count > best_count {
            best_count = count;
            best = entry.family;
        }
    }
    best
}

fn extract_entities(query: &str, query_lower: &str) -> Entities {
    let file_paths = FILE_PATH_RE.find_iter(query).map(|m| m.as_str().to_string()).collect();
    let function_names: Vec<String> = FUNCTION_NAME_RE
        .captures_iter(query)
        .map(|c| c[1].to_string())
        .collect();
    let class_names: Vec<String> = CLASS_NAME_RE
        .captures_iter(query)
        .map(|c| c[1].to_string())
        .filter(|name| name.len() > 2)
        .collect();
    let keywords = TECHNICAL_KEYWORDS
        .iter()
        .filter(|k| query_lower.contains(*k))
        .map(|k| k.to_string())
        .collect();
    Entities { file_paths, function_names, class_names, keywords }
}

fn detect_multi_part(query: &str) -> bool {
    let question_marks = query.matches('?').count();
    let conjunctions = [" and ", " also ", " then ", "; "]
        .iter()
        .filter(|c| query.to_lowercase().contains(*c))
        .count();
    question_marks > 1 || conjunctions > 0
}

fn detect_external_context(query_lower: &str) -> bool {
    EXTERNAL_CONTEXT_MARKERS.iter().any(|m| query_lower.contains(m))
}

fn score_complexity(query: &str, entities: &Entities, multi_part: bool) -> Complexity {
    let word_count = query.split_whitespace().count();
    let entity_count = entities.file_paths.len()
        + entities.function_names.len()
        + entities.class_names.len()
        + entities.keywords.len();

    if multi_part || word_count > 40 || entity_count > 6 {
        Complexity::Complex
    } else if word_count > 15 || entity_count > 2 {
        Complexity::Moderate
    } else {
        Complexity::Simple
    }
}

/// Analyzes `state.query` in place and, if `state.session_id` is set, loads
/// up to the last 20 messages (10 turns) from the session store.
pub async fn run(state: &mut AgentState, session_store: &SessionStore) -> Result<(), AppError> {
    let query_lower = state.query.to_lowercase();
    let entities = extract_entities(&state.query, &query_lower);
    let multi_part = detect_multi_part(&state.query);
    let has_external_context = detect_external_context(&query_lower);
    let complexity = score_complexity(&state.query, &entities, multi_part);
    let intent = classify_intent(&query_lower);

    state.query_analysis = Some(QueryAnalysis {
        intent,
        entities,
        is_multi_part: multi_part,
        has_external_context,
        complexity,
    });

    if let Some(session_id) = state.session_id {
        state.session_history = session_store.recent_messages(session_id, 20).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_bug_finding_intent() {
        let intent = classify_intent("why does this crash with an exception on startup");
        assert_eq!(intent, IntentFamily::BugFinding);
    }

    #[test]
    fn extracts_file_path_and_function_entities() {
        let query = "what does parse_file() in ast.rs do";
        let entities = extract_entities(query, &query.to_lowercase());
        assert!(entities.file_paths.iter().any(|p| p == "ast.rs"));
        assert!(entities.function_names.iter().any(|f| f == "parse_file"));
    }

    #[test]
    fn multi_part_detected_from_conjunction() {
        assert!(detect_multi_part("explain auth and then show me the session store"));
        assert!(!detect_multi_part("explain auth"));
    }

    #[test]
    fn complexity_escalates_with_entity_count() {
        let entities = Entities {
            file_paths: vec!["a.rs".into(), "b.rs".into()],
            function_names: vec!["f".into(), "g".into(), "h".into()],
            class_names: vec!["A".into(), "B".into()],
            keywords: vec!["cache".into()],
        };
        assert_eq!(score_complexity("short query", &entities, false), Complexity::Complex);
    }
}
