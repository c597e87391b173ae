//! Wayfarer: response cache and conversation state core for a travel
//! assistant chat backend.
//!
//! - [`cache::ResponseCache`]: bounded LRU + TTL store for LLM replies with
//!   memory-pressure offload and hit/miss/eviction statistics.
//! - [`session::ConversationManager`]: per-session history, context
//!   fingerprints for cache lookups, and repetition detection.
//! - [`agent::ChatHandler`]: ties both to a [`providers::CompletionProvider`].
//! - [`api`]: axum routes for chat, performance stats and cache administration.
//!
//! # Example
//!
//! ```
//! use wayfarer::agent::{ChatHandler, ReplySource};
//! use wayfarer::providers::EchoProvider;
//! use wayfarer::session::FingerprintParams;
//!
//! # tokio_test::block_on(async {
//! let handler = ChatHandler::builder().provider(EchoProvider).build().unwrap();
//! let params = FingerprintParams::new().with("language", "en");
//!
//! let first = handler.handle("alice", "Weekend in Porto?", &params).await.unwrap();
//! assert_eq!(first.source, ReplySource::Provider);
//!
//! // Same context from another session is answered from the cache.
//! let second = handler.handle("bob", "weekend in porto", &params).await.unwrap();
//! assert_eq!(second.source, ReplySource::Cache);
//! # });
//! ```

pub mod agent;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod providers;
pub mod session;
pub mod utils;

pub use agent::{ChatHandler, ChatReply, ReplySource};
pub use cache::{CacheLookup, CacheStats, CacheValue, ResponseCache};
pub use config::Config;
pub use error::{Result, WayfarerError};
pub use session::{ConversationManager, FingerprintParams, Role, SessionState, SessionView};
