pub mod error;
pub mod openai;

pub use error::{CompletionError, ErrorKind, MissingField};
pub use openai::{interpret_response, ChatRequest, OpenAIClient};

use async_trait::async_trait;

use crate::state::Turn;

/// A remote text-generation endpoint.
///
/// Implementations receive the full history plus the new user message and must
/// not keep any conversation state of their own.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, history: &[Turn], message: &str) -> Result<String, CompletionError>;
}
