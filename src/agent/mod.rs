//! Request handling: conversation state, cache lookup and provider fallback.

pub mod handler;

pub use handler::{ChatHandler, ChatHandlerBuilder, ChatReply, ReplySource};
