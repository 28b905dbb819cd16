//! HTTP client for an OpenAI-compatible chat completion endpoint.

use async_trait::async_trait;
use chat_types::{GeneratorError, TextGenerator};
use serde::{Deserialize, Serialize};
use std::fmt;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a programming assistant for students. \
Explain concepts and walk through code examples in detail. \
Separate paragraphs and sections with blank lines.";

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Text generator backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
}

impl OpenAiGenerator {
    pub fn new(
        api_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key,
            model: model.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Create from `LLM_API_URL`, `LLM_API_KEY`, and `LLM_MODEL`.
    /// Returns `None` when no API key is configured.
    pub fn from_env() -> Option<Self> {
        let api_url = std::env::var("LLM_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let api_key = std::env::var("LLM_API_KEY").ok()?;
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Some(Self::new(api_url, Some(api_key), model))
    }

    fn build_messages(&self, history: &str, prompt: &str) -> Vec<ChatMessage> {
        let user = if history.trim().is_empty() {
            prompt.to_string()
        } else {
            format!("History:\n{}\n\nQuestion: {}", history, prompt)
        };
        vec![
            ChatMessage {
                role: "system",
                content: self.system_prompt.clone(),
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ]
    }
}

impl fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, history: &str, prompt: &str) -> Result<String, GeneratorError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: self.build_messages(history, prompt),
            max_tokens: Some(4096),
            temperature: Some(0.7),
        };

        let mut req = self.client.post(&self.api_url).json(&request);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| GeneratorError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, model = %self.model, "generation request rejected");
            return Err(GeneratorError::Api(format!("status: {}, body: {}", status, body)));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::Parse(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GeneratorError::Other("no choices returned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_folded_into_user_turn() {
        let g = OpenAiGenerator::new("http://localhost", None, "m");
        let msgs = g.build_messages("User: hi\nAssistant: hello", "next?");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "system");
        assert!(msgs[1].content.starts_with("History:\nUser: hi"));
        assert!(msgs[1].content.ends_with("Question: next?"));
    }

    #[test]
    fn empty_history_sends_bare_prompt() {
        let g = OpenAiGenerator::new("http://localhost", None, "m").with_system_prompt("be brief");
        let msgs = g.build_messages("  ", "hello");
        assert_eq!(msgs[0].content, "be brief");
        assert_eq!(msgs[1].content, "hello");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let g = OpenAiGenerator::new("http://127.0.0.1:1/v1/chat/completions", None, "m");
        let err = g.generate("", "hi").await.unwrap_err();
        assert!(matches!(err, GeneratorError::Http(_)));
    }
}
