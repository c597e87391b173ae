//! Chat request orchestration.
//!
//! One inbound message flows through the conversation manager (history,
//! repetition detection), then the response cache keyed by the context
//! fingerprint, and only on a miss out to the completion provider.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::cache::{CacheLookup, ResponseCache};
use crate::config::{CacheConfig, ConversationConfig, DEFAULT_SYSTEM_PROMPT};
use crate::error::{Result, WayfarerError};
use crate::health::UsageMetrics;
use crate::providers::{CompletionProvider, PromptContext};
use crate::session::{ConversationManager, FingerprintParams, Role, SessionView};

pub const DISAMBIGUATION_REPLY: &str = "It looks like we keep coming back to the same question. \
     Could you tell me a bit more about what you are looking for? \
     You can also say \"start over\" to begin a new conversation.";
pub const FAREWELL_REPLY: &str = "Thanks for planning with me. Safe travels!";
pub const RESET_REPLY: &str = "Sure, let's start over. Where would you like to go?";

/// Where a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Cache,
    Provider,
    Disambiguation,
    Farewell,
    Reset,
}

/// Result of handling one user message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    /// Session after the exchange.
    pub session: SessionView,
    pub reply: String,
    pub source: ReplySource,
}

/// Glue between the conversation manager, the response cache and the
/// completion provider.
pub struct ChatHandler {
    cache: Arc<ResponseCache>,
    conversations: Arc<ConversationManager>,
    provider: Arc<dyn CompletionProvider>,
    metrics: Arc<UsageMetrics>,
    system_prompt: String,
    cache_ttl: Option<Duration>,
    /// Per-session serialization of whole exchanges. Entries exist only
    /// while a request for that session is in flight.
    turn_gates: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl ChatHandler {
    pub fn builder() -> ChatHandlerBuilder {
        ChatHandlerBuilder::new()
    }

    /// Handle one user message for `session_id`.
    ///
    /// Messages for the same session are handled one at a time, from the
    /// user turn through the assistant reply, so concurrent requests never
    /// interleave their turns or cache keys.
    ///
    /// # Errors
    ///
    /// Malformed session ids, and provider failures. A failed completion is
    /// never cached and leaves no assistant turn behind.
    pub async fn handle(
        &self,
        session_id: &str,
        text: &str,
        params: &FingerprintParams,
    ) -> Result<ChatReply> {
        self.metrics.record_request();
        let gate = self.turn_gate(session_id);
        let result = {
            let _turn = gate.lock().await;
            self.handle_exclusive(session_id, text, params).await
        };
        drop(gate);
        // Only the map holds the gate once no request is using it.
        self.turn_gates
            .remove_if(session_id, |_, g| Arc::strong_count(g) == 1);
        result
    }

    async fn handle_exclusive(
        &self,
        session_id: &str,
        text: &str,
        params: &FingerprintParams,
    ) -> Result<ChatReply> {
        if self.conversations.is_reset_request(text) {
            let session = match self.conversations.reset(session_id)? {
                Some(view) => view,
                None => self.conversations.open(session_id)?,
            };
            return Ok(ChatReply {
                session,
                reply: RESET_REPLY.to_string(),
                source: ReplySource::Reset,
            });
        }

        let outcome = self
            .conversations
            .append_user_turn(session_id, text, params)?;
        let view = outcome.view;

        if view.is_terminating() {
            return Ok(ChatReply {
                session: view,
                reply: FAREWELL_REPLY.to_string(),
                source: ReplySource::Farewell,
            });
        }

        if view.is_repeating() {
            info!(
                session = session_id,
                occurrences = view.repeat_occurrences,
                "Repeated question, asking for clarification"
            );
            return self.reply_with(
                session_id,
                DISAMBIGUATION_REPLY.to_string(),
                ReplySource::Disambiguation,
            );
        }

        let key = outcome.fingerprint;
        if let Some(key) = &key {
            if let CacheLookup::Hit(value) = self.cache.get(key)? {
                debug!(session = session_id, key = %short(key), "Serving cached reply");
                self.metrics.record_cache_reply();
                let reply = String::from_utf8_lossy(value.as_bytes()).into_owned();
                return self.reply_with(session_id, reply, ReplySource::Cache);
            }
        }

        let context = PromptContext {
            system_prompt: self.system_prompt.clone(),
            turns: outcome.context,
            params: params.clone(),
        };
        debug!(
            session = session_id,
            provider = self.provider.name(),
            turns = context.turns.len(),
            "Cache miss, calling provider"
        );
        self.metrics.record_provider_call();
        let reply = match self.provider.complete(&context).await {
            Ok(reply) => reply,
            Err(err) => {
                self.metrics.record_error();
                return Err(err);
            }
        };

        if let Some(key) = &key {
            self.cache.set(key, reply.as_str(), self.cache_ttl)?;
        }
        self.reply_with(session_id, reply, ReplySource::Provider)
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.conversations
    }

    pub fn metrics(&self) -> &Arc<UsageMetrics> {
        &self.metrics
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn turn_gate(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        self.turn_gates
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn reply_with(
        &self,
        session_id: &str,
        reply: String,
        source: ReplySource,
    ) -> Result<ChatReply> {
        let session = self
            .conversations
            .append_turn(session_id, Role::Assistant, &reply)?;
        Ok(ChatReply {
            session,
            reply,
            source,
        })
    }
}

/// Builder for [`ChatHandler`]. A provider is required; cache and
/// conversation manager default to fresh instances with default settings.
pub struct ChatHandlerBuilder {
    cache: Option<Arc<ResponseCache>>,
    conversations: Option<Arc<ConversationManager>>,
    provider: Option<Arc<dyn CompletionProvider>>,
    metrics: Option<Arc<UsageMetrics>>,
    system_prompt: Option<String>,
    cache_ttl: Option<Duration>,
}

impl ChatHandlerBuilder {
    pub fn new() -> Self {
        Self {
            cache: None,
            conversations: None,
            provider: None,
            metrics: None,
            system_prompt: None,
            cache_ttl: None,
        }
    }

    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn conversations(mut self, conversations: Arc<ConversationManager>) -> Self {
        self.conversations = Some(conversations);
        self
    }

    /// Set the completion provider (required).
    pub fn provider(mut self, provider: impl CompletionProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    pub fn shared_provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn metrics(mut self, metrics: Arc<UsageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// TTL for cached replies. Defaults to the cache's own default TTL.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Returns `Err` if no provider was set.
    pub fn build(self) -> Result<ChatHandler> {
        let provider = self.provider.ok_or_else(|| {
            WayfarerError::Config(
                "ChatHandler requires a provider. Call .provider() on the builder.".into(),
            )
        })?;
        Ok(ChatHandler {
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(ResponseCache::new(CacheConfig::default()))),
            conversations: self.conversations.unwrap_or_else(|| {
                Arc::new(ConversationManager::new(ConversationConfig::default()))
            }),
            provider,
            metrics: self.metrics.unwrap_or_default(),
            system_prompt: self
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            cache_ttl: self.cache_ttl,
            turn_gates: DashMap::new(),
        })
    }
}

impl Default for ChatHandlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn short(key: &str) -> &str {
    key.get(..8).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::EchoProvider;
    use crate::session::SessionState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Returns a fixed reply (or error) and counts calls.
    struct MockProvider {
        reply: std::result::Result<String, String>,
        calls: Arc<AtomicUsize>,
    }

    impl MockProvider {
        fn ok(reply: &str) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let provider = Self {
                reply: Ok(reply.to_string()),
                calls: calls.clone(),
            };
            (provider, calls)
        }

        fn failing(message: &str) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let provider = Self {
                reply: Err(message.to_string()),
                calls: calls.clone(),
            };
            (provider, calls)
        }
    }

    #[async_trait]
    impl CompletionProvider for MockProvider {
        async fn complete(&self, context: &PromptContext) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(reply) => Ok(match context.params.get("language") {
                    Some(lang) => format!("{reply} ({lang})"),
                    None => reply.clone(),
                }),
                Err(message) => Err(WayfarerError::Provider(message.clone())),
            }
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(
            ChatHandler::builder().build(),
            Err(WayfarerError::Config(_))
        ));
    }

    #[test]
    fn test_builder_minimal() {
        let (provider, _) = MockProvider::ok("hi");
        let handler = ChatHandler::builder().provider(provider).build().unwrap();
        assert_eq!(handler.provider_name(), "mock");
        assert!(handler.cache().is_empty());
        assert!(handler.conversations().is_empty());
    }

    #[tokio::test]
    async fn test_provider_called_once_for_identical_context() {
        let (provider, calls) = MockProvider::ok("Try the Alfama district.");
        let handler = ChatHandler::builder().provider(provider).build().unwrap();
        let params = FingerprintParams::new();

        let first = handler
            .handle("a", "Where to stay in Lisbon?", &params)
            .await
            .unwrap();
        assert_eq!(first.source, ReplySource::Provider);

        // Same context in a different session hits the cache.
        let second = handler
            .handle("b", "where to stay in lisbon", &params)
            .await
            .unwrap();
        assert_eq!(second.source, ReplySource::Cache);
        assert_eq!(second.reply, "Try the Alfama district.");
        assert_eq!(second.session.history.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.cache().stats().hits, 1);
        let usage = handler.metrics().snapshot();
        assert_eq!(usage.requests, 2);
        assert_eq!(usage.cache_replies, 1);
        assert_eq!(usage.provider_calls, 1);
    }

    #[tokio::test]
    async fn test_params_change_cache_key() {
        let (provider, calls) = MockProvider::ok("answer");
        let handler = ChatHandler::builder().provider(provider).build().unwrap();

        let en = FingerprintParams::new().with("language", "en");
        let fr = FingerprintParams::new().with("language", "fr");
        let a = handler.handle("a", "Best time to visit Kyoto", &en).await.unwrap();
        let b = handler.handle("b", "Best time to visit Kyoto", &fr).await.unwrap();
        assert_eq!(a.reply, "answer (en)");
        assert_eq!(b.reply, "answer (fr)");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_provider_error_propagates_and_is_not_cached() {
        let (provider, calls) = MockProvider::failing("upstream 503");
        let handler = ChatHandler::builder().provider(provider).build().unwrap();

        let err = handler
            .handle("a", "Ferry times to Capri", &FingerprintParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WayfarerError::Provider(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handler.cache().is_empty());
        assert_eq!(handler.metrics().snapshot().errors, 1);
        let session = handler.conversations().get("a").unwrap().unwrap();
        assert_eq!(session.history.len(), 1);
    }

    #[tokio::test]
    async fn test_repeating_session_gets_disambiguation() {
        let (provider, calls) = MockProvider::ok("Check the embassy site.");
        let handler = ChatHandler::builder().provider(provider).build().unwrap();
        let params = FingerprintParams::new();
        for _ in 0..2 {
            let reply = handler.handle("s", "visa for japan", &params).await.unwrap();
            assert_ne!(reply.source, ReplySource::Disambiguation);
        }
        let reply = handler.handle("s", "Visa for Japan?", &params).await.unwrap();
        assert_eq!(reply.source, ReplySource::Disambiguation);
        assert_eq!(reply.reply, DISAMBIGUATION_REPLY);
        assert_eq!(reply.session.state, SessionState::Repeating);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let reply = handler
            .handle("s", "ok then, ryokan recommendations in kyoto", &params)
            .await
            .unwrap();
        assert_eq!(reply.session.state, SessionState::Active);
        assert_eq!(reply.source, ReplySource::Provider);
    }

    #[tokio::test]
    async fn test_reset_phrase_resets_session() {
        let handler = ChatHandler::builder().provider(EchoProvider).build().unwrap();
        let params = FingerprintParams::new();
        handler.handle("s", "beaches in crete", &params).await.unwrap();
        let reply = handler.handle("s", "Start over", &params).await.unwrap();
        assert_eq!(reply.source, ReplySource::Reset);
        assert!(reply.session.history.is_empty());
        assert_eq!(reply.session.state, SessionState::Active);

        let reply = handler.handle("new", "reset", &params).await.unwrap();
        assert_eq!(reply.source, ReplySource::Reset);
        assert_eq!(reply.session.session_id, "new");
    }

    #[tokio::test]
    async fn test_farewell_removes_session() {
        let handler = ChatHandler::builder().provider(EchoProvider).build().unwrap();
        let params = FingerprintParams::new();
        handler.handle("s", "hostels in prague", &params).await.unwrap();
        let reply = handler.handle("s", "bye", &params).await.unwrap();
        assert_eq!(reply.source, ReplySource::Farewell);
        assert_eq!(reply.session.state, SessionState::Terminating);
        assert!(handler.conversations().get("s").unwrap().is_none());
    }

    // Records how many turns each prompt carried.
    struct RecordingProvider {
        seen: Arc<parking_lot::Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl CompletionProvider for RecordingProvider {
        async fn complete(&self, context: &PromptContext) -> Result<String> {
            self.seen.lock().push(context.turns.len());
            Ok(format!("About {}", context.latest_text().unwrap_or_default()))
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    // Parks on the first question until released.
    struct ParkingProvider {
        entered: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl CompletionProvider for ParkingProvider {
        async fn complete(&self, context: &PromptContext) -> Result<String> {
            let text = context.latest_text().unwrap_or_default().to_string();
            if text == "first question" {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(format!("answer to {text}"))
        }

        fn name(&self) -> &str {
            "parking"
        }
    }

    const QUESTIONS: [&str; 12] = [
        "best tapas bars in seville",
        "how do I get from the airport to central vienna",
        "is the louvre open on tuesdays",
        "cheap hostels near prague old town",
        "day trip ideas from florence",
        "what currency do they use in norway",
        "ferry schedule between athens and santorini",
        "do I need a visa for vietnam",
        "top hiking trails in the dolomites",
        "when is cherry blossom season in kyoto",
        "local sim cards for travelers in peru",
        "night markets worth visiting in taipei",
    ];

    #[tokio::test]
    async fn test_provider_sees_full_kept_history() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let handler = ChatHandler::builder()
            .provider(RecordingProvider { seen: seen.clone() })
            .build()
            .unwrap();
        let params = FingerprintParams::new();
        for question in QUESTIONS {
            handler
                .handle("s", question, &params)
                .await
                .unwrap();
        }
        // Eleven earlier exchanges plus the new question.
        assert_eq!(seen.lock().last().copied(), Some(23));
    }

    #[tokio::test]
    async fn test_prompt_context_turns_caps_provider_context() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let conversations = Arc::new(ConversationManager::new(ConversationConfig {
            prompt_context_turns: 5,
            ..ConversationConfig::default()
        }));
        let handler = ChatHandler::builder()
            .provider(RecordingProvider { seen: seen.clone() })
            .conversations(conversations)
            .build()
            .unwrap();
        let params = FingerprintParams::new();
        for question in &QUESTIONS[..6] {
            handler
                .handle("s", question, &params)
                .await
                .unwrap();
        }
        assert_eq!(*seen.lock(), vec![1, 3, 5, 5, 5, 5]);
    }

    #[tokio::test]
    async fn test_concurrent_messages_keep_exchanges_together() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let handler = Arc::new(
            ChatHandler::builder()
                .provider(ParkingProvider {
                    entered: entered.clone(),
                    release: release.clone(),
                })
                .build()
                .unwrap(),
        );
        let params = FingerprintParams::new();

        let first = tokio::spawn({
            let handler = Arc::clone(&handler);
            let params = params.clone();
            async move { handler.handle("s", "first question", &params).await }
        });
        entered.notified().await;

        let second = tokio::spawn({
            let handler = Arc::clone(&handler);
            let params = params.clone();
            async move { handler.handle("s", "second question", &params).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The second message waits for the first exchange to finish.
        let pending = handler.conversations().get("s").unwrap().unwrap();
        assert_eq!(pending.total_turns, 1);

        release.notify_one();
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.reply, "answer to first question");
        assert_eq!(second.reply, "answer to second question");

        let history: Vec<String> = handler
            .conversations()
            .get("s")
            .unwrap()
            .unwrap()
            .history
            .iter()
            .map(|t| format!("{}:{}", t.role.as_str(), t.text))
            .collect();
        assert_eq!(
            history,
            vec![
                "user:first question",
                "assistant:answer to first question",
                "user:second question",
                "assistant:answer to second question",
            ]
        );

        // Each answer is cached under the context it answered.
        let twin = handler
            .handle("t", "first question", &params)
            .await
            .unwrap();
        assert_eq!(twin.source, ReplySource::Cache);
        assert_eq!(twin.reply, "answer to first question");
        assert!(handler.turn_gates.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_session_id() {
        let handler = ChatHandler::builder().provider(EchoProvider).build().unwrap();
        let err = handler
            .handle("", "hello", &FingerprintParams::new())
            .await
            .unwrap_err();
        assert!(err.is_programming_error());
    }
}
