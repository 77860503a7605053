//! The LLM provider collaborator contract.
//!
//! Concrete provider clients (OpenAI/Claude/Perplexity) are out of scope
//! (`spec.md` §1): callers only ever see the single `complete` contract,
//! plus a deterministic mock used by tests and by the analyze-tool
//! handlers' default composition.

use async_trait::async_trait;

use memcortex_protocol::MemoryResult;

/// A single turn in a chat-style completion request.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    /// Message body.
    pub content: String,
}

impl ChatMessage {
    /// Build a user-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Build a system-role message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Token accounting for a completion call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// `prompt_tokens + completion_tokens`.
    pub total_tokens: u32,
}

/// The result of a completion call.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Generated text.
    pub content: String,
    /// Token accounting reported by the provider.
    pub usage: Usage,
    /// Model identifier that served the request.
    pub model: String,
}

/// A provider client able to complete a chat-style prompt.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete `messages`, bounded by `max_tokens` and sampled at
    /// `temperature`.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> MemoryResult<Completion>;
}

/// A deterministic mock provider: echoes a fixed response shape so the
/// analyze-tool handlers can be exercised without a real API key. Carries
/// no production logic.
pub struct MockLlmClient {
    model: String,
}

impl MockLlmClient {
    /// Build a mock client reporting `model` as its identifier.
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new("mock-llm")
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        _temperature: f32,
    ) -> MemoryResult<Completion> {
        let prompt_tokens = messages.iter().map(|m| m.content.split_whitespace().count() as u32).sum();
        let content = messages
            .last()
            .map(|m| format!("mock response to: {}", m.content))
            .unwrap_or_else(|| "mock response".to_string());
        let completion_tokens = content.split_whitespace().count().min(max_tokens as usize) as u32;
        Ok(Completion {
            content,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            model: self.model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_echoes_last_message() {
        let client = MockLlmClient::default();
        let messages = vec![ChatMessage::system("be terse"), ChatMessage::user("hello")];
        let completion = client.complete(&messages, 100, 0.2).await.unwrap();
        assert!(completion.content.contains("hello"));
        assert_eq!(completion.usage.total_tokens, completion.usage.prompt_tokens + completion.usage.completion_tokens);
    }
}
