//! External completion providers.
//!
//! The chat handler only calls a provider on a response cache miss. Latency,
//! retries and rate limits are the provider's business; errors are surfaced
//! as [`WayfarerError::Provider`](crate::error::WayfarerError::Provider).

pub mod echo;
pub mod openai;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::session::{FingerprintParams, Turn};

pub use echo::EchoProvider;
pub use openai::OpenAiCompatProvider;

/// Everything a provider needs to produce the next assistant reply.
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub system_prompt: String,
    /// Recent history, oldest first. The newest turn is the user message
    /// being answered.
    pub turns: Vec<Turn>,
    pub params: FingerprintParams,
}

impl PromptContext {
    /// Text of the newest turn.
    pub fn latest_text(&self) -> Option<&str> {
        self.turns.last().map(|t| t.text.as_str())
    }
}

/// Remote text completion.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, context: &PromptContext) -> Result<String>;

    /// Short provider name used in logs.
    fn name(&self) -> &str;
}
