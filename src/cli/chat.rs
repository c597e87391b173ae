//! `wayfarer chat`: interactive terminal session against the handler.

use std::sync::Arc;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use wayfarer::agent::{ChatHandler, ReplySource};
use wayfarer::cache::ResponseCache;
use wayfarer::config::Config;
use wayfarer::session::{ConversationManager, FingerprintParams};

use super::build_provider;

const PROMPT: &str = "you> ";

pub(crate) async fn cmd_chat(config: Config, session: Option<String>, echo: bool) -> Result<()> {
    let provider = build_provider(&config, echo)?;
    let handler = ChatHandler::builder()
        .cache(Arc::new(ResponseCache::new(config.cache.clone())))
        .conversations(Arc::new(ConversationManager::new(
            config.conversation.clone(),
        )))
        .shared_provider(provider)
        .system_prompt(config.provider.system_prompt.clone())
        .build()
        .with_context(|| "Failed to build chat handler")?;

    let session_id = session.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
    let params = FingerprintParams::new();
    let mut editor = DefaultEditor::new().with_context(|| "Failed to initialize line editor")?;

    println!("Wayfarer chat ({}), session {}", handler.provider_name(), session_id);
    println!("Commands: /stats, /session, /quit");
    println!();

    loop {
        let line = match editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e).with_context(|| "Failed to read input"),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(input);

        match input {
            "/quit" => break,
            "/stats" => {
                println!("{}", serde_json::to_string_pretty(&handler.cache().stats())?);
                continue;
            }
            "/session" => {
                match handler.conversations().get(&session_id)? {
                    Some(view) => println!("{}", serde_json::to_string_pretty(&view)?),
                    None => println!("(no active session)"),
                }
                continue;
            }
            _ => {}
        }

        match handler.handle(&session_id, input, &params).await {
            Ok(reply) => {
                let tag = match reply.source {
                    ReplySource::Cache => " (cached)",
                    _ => "",
                };
                println!("wayfarer{}> {}", tag, reply.reply);
                println!();
                if reply.source == ReplySource::Farewell {
                    break;
                }
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}
