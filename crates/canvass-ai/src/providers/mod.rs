//! Provider implementations

pub mod google;
pub mod openai;

use crate::error::Result;
use crate::types::{ChatMessage, GenerateOptions};
use async_trait::async_trait;

pub use google::GoogleProvider;
pub use openai::OpenAiProvider;

/// A chat-style text-generation backend.
///
/// Implementations perform exactly one generation attempt per call; retry,
/// backoff, and fallback live in [`crate::client::FallbackClient`].
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Human-readable provider name, used in logs
    fn name(&self) -> &str;

    /// Run one generation call and return the full response text
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<String>;
}
