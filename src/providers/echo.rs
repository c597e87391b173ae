//! Offline provider that answers with the user's own words.

use async_trait::async_trait;

use super::{CompletionProvider, PromptContext};
use crate::error::Result;

/// Replies with the latest message. Useful for `wayfarer chat --echo` and
/// for exercising the cache without network access.
#[derive(Debug, Default, Clone)]
pub struct EchoProvider;

impl EchoProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CompletionProvider for EchoProvider {
    async fn complete(&self, context: &PromptContext) -> Result<String> {
        let text = context.latest_text().unwrap_or_default();
        let mut reply = format!("You said: {text}");
        if let Some(lang) = context.params.get("language") {
            reply.push_str(&format!(" [{lang}]"));
        }
        Ok(reply)
    }

    fn name(&self) -> &str {
        "echo"
    }
}
