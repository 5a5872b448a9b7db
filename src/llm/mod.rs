pub mod client;

pub use client::LlmClient;

use crate::error::ExternalServiceError;
use async_trait::async_trait;

/// Turns text into an embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ExternalServiceError>;
}

/// Single-shot chat completion without tools.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the model's text; an empty string when it produced none.
    async fn complete(&self, system: &str, user: &str) -> Result<String, ExternalServiceError>;
}
