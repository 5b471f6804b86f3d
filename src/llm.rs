//! LLM provider — streams token fragments from the configured provider
//! (Anthropic Claude). Modeled as a trait yielding a `Stream<Item = String>`
//! that the pipeline forwards into a bounded channel; see `agent::generate`.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_query: &str) -> Result<TokenStream, AppError>;
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        AnthropicProvider { client: reqwest::Client::new(), api_url, api_key, model }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    stream: bool,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    delta: Option<Value>,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn generate(&self, system_prompt: &str, user_query: &str) -> Result<TokenStream, AppError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: 4096,
            system: system_prompt,
            stream: true,
            messages: vec![AnthropicMessage { role: "user", content: user_query }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalService { service: "anthropic", message: e.to_string() })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService {
                service: "anthropic",
                message: format!("generation request failed with status {}", response.status()),
            });
        }

        let byte_stream = response.bytes_stream();
        let token_stream = byte_stream
            .map(|chunk| chunk.map_err(|e| AppError::ExternalService { service: "anthropic", message: e.to_string() }))
            .flat_map(|chunk| {
                let fragments: Vec<Result<String, AppError>> = match chunk {
                    Ok(bytes) => parse_sse_chunk(&bytes),
                    Err(e) => vec![Err(e)],
                };
                futures::stream::iter(fragments)
            });

        Ok(Box::pin(token_stream))
    }
}

/// Parse one or more `data: {...}` lines out of a raw SSE byte chunk,
/// extracting `content_block_delta` text fragments.
fn parse_sse_chunk(bytes: &[u8]) -> Vec<Result<String, AppError>> {
    let text = String::from_utf8_lossy(bytes);
    let mut out = Vec::new();
    for line in text.lines() {
        let Some(payload) = line.strip_prefix("data: ") else { continue };
        if payload == "[DONE]" {
            continue;
        }
        let Ok(event) = serde_json::from_str::<StreamEvent>(payload) else { continue };
        if event.event_type == "content_block_delta" {
            if let Some(delta) = event.delta {
                if let Some(text) = delta.get("text").and_then(Value::as_str) {
                    out.push(Ok(text.to_string()));
                }
            }
        }
    }
    out
}

/// Fixed-fragment provider for tests and local dev without a network call.
pub struct EchoLlmProvider;

#[async_trait]
impl LlmProvider for EchoLlmProvider {
    async fn generate(&self, _system_prompt: &str, user_query: &str) -> Result<TokenStream, AppError> {
        let fragments: Vec<Result<String, AppError>> =
            user_query.split_whitespace().map(|w| Ok(format!("{w} "))).collect();
        Ok(Box::pin(futures::stream::iter(fragments)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_provider_streams_fragments() {
        let provider = EchoLlmProvider;
        let mut stream = provider.generate("system", "hello world").await.unwrap();
        let mut collected = String::new();
        while let Some(fragment) = stream.next().await {
            collected.push_str(&fragment.unwrap());
        }
        assert_eq!(collected.trim(), "hello world");
    }

    #[test]
    fn parses_content_block_delta_events() {
        let chunk = b"event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"hi\"}}\n\n";
        let out = parse_sse_chunk(chunk);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), "hi");
    }
}
