//! Node 4 — Generate.
//!
//! Composes the fixed system prompt (context capped at 50,000 chars, last 5
//! history messages), opens the LLM provider's token stream, and forwards
//! each fragment both into `state.response` and into the bounded channel the
//! SSE encoder drains; see `llm.rs`.

use tokio::sync::mpsc;

use futures::StreamExt;

use crate::error::AppError;
use crate::llm::LlmProvider;
use crate::model::MessageRole;

use super::state::AgentState;
use super::PipelineEvent;

const MAX_CONTEXT_CHARS: usize = 50_000;
const MAX_HISTORY_MESSAGES: usize = 5;

const SYSTEM_PROMPT_PREAMBLE: &str = "\
You are a code understanding assistant. Answer the user's question about \
the codebase using only the retrieved context below. Cite the specific \
file paths and line ranges your answer relies on. If the context does not \
contain enough information to answer, say so rather than guessing.";

fn truncate_context(context: &str, max_chars: usize) -> &str {
    if context.chars().count() <= max_chars {
        context
    } else {
        let byte_end = context.char_indices().nth(max_chars).map(|(i, _)| i).unwrap_or(context.len());
        &context[..byte_end]
    }
}

fn render_history(history: &[crate::model::Message]) -> String {
    history
        .iter()
        .rev()
        .take(MAX_HISTORY_MESSAGES)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|m| {
            let role = match m.role {
                MessageRole::User => "User",
                MessageRole::Assistant => "Assistant",
            };
            format!("{role}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_system_prompt(state: &AgentState) -> String {
    let context = truncate_context(&state.context, MAX_CONTEXT_CHARS);
    let history = render_history(&state.session_history);
    let mut prompt = String::new();
    prompt.push_str(SYSTEM_PROMPT_PREAMBLE);
    prompt.push_str("\n\nContext:\n");
    prompt.push_str(context);
    if !history.is_empty() {
        prompt.push_str("\n\nRecent conversation:\n");
        prompt.push_str(&history);
    }
    prompt
}

pub async fn run(
    state: &mut AgentState,
    llm: &dyn LlmProvider,
    events: &mpsc::Sender<PipelineEvent>,
) -> Result<(), AppError> {
    let system_prompt = build_system_prompt(state);
    let started = std::time::Instant::now();
    let mut stream = llm.generate(&system_prompt, &state.query).await?;
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        state.response.push_str(&fragment);
        let _ = events.send(PipelineEvent::Chunk(fragment)).await;
    }
    crate::metrics::record_llm_call(started.elapsed().as_secs_f64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoLlmProvider;
    use crate::model::Message;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn context_is_truncated_to_cap() {
        let long = "x".repeat(100);
        assert_eq!(truncate_context(&long, 10).chars().count(), 10);
        assert_eq!(truncate_context("short", 10), "short");
    }

    #[test]
    fn history_keeps_only_last_five_in_order() {
        let history: Vec<Message> = (0..8)
            .map(|i| Message {
                role: MessageRole::User,
                content: format!("turn {i}"),
                citations: None,
                retrieved_chunk_ids: None,
                token_count: None,
                created_at: Utc::now(),
            })
            .collect();
        let rendered = render_history(&history);
        assert!(rendered.contains("turn 7"));
        assert!(rendered.contains("turn 3"));
        assert!(!rendered.contains("turn 2"));
        // Earliest kept turn should appear before the latest in the string.
        assert!(rendered.find("turn 3").unwrap() < rendered.find("turn 7").unwrap());
    }

    #[tokio::test]
    async fn generate_accumulates_streamed_fragments_into_response() {
        let mut state = AgentState::new(Uuid::new_v4(), None, "hello world".to_string());
        let (tx, mut rx) = mpsc::channel(16);
        let provider = EchoLlmProvider;
        run(&mut state, &provider, &tx).await.unwrap();
        assert_eq!(state.response.trim(), "hello world");
        drop(tx);
        let mut forwarded = String::new();
        while let Some(PipelineEvent::Chunk(c)) = rx.recv().await {
            forwarded.push_str(&c);
        }
        assert_eq!(forwarded.trim(), "hello world");
    }
}
