//! OpenAI-compatible text generation client.

#[cfg(feature = "test-util")]
pub mod mock;
mod openai;

pub use chat_types::{GeneratorError, TextGenerator};
pub use openai::OpenAiGenerator;

#[cfg(feature = "test-util")]
pub use mock::{EchoGenerator, FailingGenerator};
