//! Generators for tests: deterministic replies, no network.

use chat_types::{GeneratorError, TextGenerator};
use std::sync::Mutex;

/// Replies `echo: {prompt}` and records the history it was given.
pub struct EchoGenerator {
    seen: Mutex<Vec<String>>,
}

impl EchoGenerator {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Histories passed to `generate`, in call order.
    pub fn histories(&self) -> Vec<String> {
        self.seen.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Default for EchoGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, history: &str, prompt: &str) -> Result<String, GeneratorError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(history.to_string());
        }
        Ok(format!("echo: {}", prompt))
    }
}

/// Always fails with an API error.
pub struct FailingGenerator;

#[async_trait::async_trait]
impl TextGenerator for FailingGenerator {
    async fn generate(&self, _history: &str, _prompt: &str) -> Result<String, GeneratorError> {
        Err(GeneratorError::Api("model unavailable".to_string()))
    }
}
