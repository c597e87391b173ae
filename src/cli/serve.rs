//! `wayfarer serve`: API server plus background maintenance.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use wayfarer::agent::ChatHandler;
use wayfarer::api::{start_server, AppState};
use wayfarer::cache::{spawn_sweeper, ResponseCache};
use wayfarer::config::watcher::ConfigWatcher;
use wayfarer::config::Config;
use wayfarer::health::{start_periodic_usage_flush, UsageMetrics};
use wayfarer::session::{spawn_pruner, ConversationManager};

use super::build_provider;

const CONFIG_POLL_SECS: u64 = 5;

pub(crate) async fn cmd_serve(config: Config, config_path: PathBuf, echo: bool) -> Result<()> {
    let cache = Arc::new(ResponseCache::new(config.cache.clone()));
    let conversations = Arc::new(ConversationManager::new(config.conversation.clone()));
    let metrics = Arc::new(UsageMetrics::new());
    let provider = build_provider(&config, echo)?;
    let provider_name = provider.name().to_string();

    let handler = ChatHandler::builder()
        .cache(cache.clone())
        .conversations(conversations.clone())
        .shared_provider(provider)
        .metrics(metrics.clone())
        .system_prompt(config.provider.system_prompt.clone())
        .build()
        .with_context(|| "Failed to build chat handler")?;
    let handler = Arc::new(handler);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = spawn_sweeper(
        cache.clone(),
        Duration::from_millis(config.cache.sweep_interval_ms),
        shutdown_rx.clone(),
    );
    let pruner = spawn_pruner(
        conversations.clone(),
        Duration::from_millis(config.conversation.prune_interval_ms),
        shutdown_rx.clone(),
    );
    let usage_flush = start_periodic_usage_flush(metrics, shutdown_rx.clone());

    // Hot reload of cache and conversation tunables.
    let (config_tx, mut config_rx) = mpsc::unbounded_channel::<Config>();
    let watcher = tokio::spawn(
        ConfigWatcher::new(config_path.clone(), Duration::from_secs(CONFIG_POLL_SECS))
            .watch(config_tx, shutdown_rx.clone()),
    );
    let reloader = {
        let cache = cache.clone();
        let conversations = conversations.clone();
        tokio::spawn(async move {
            while let Some(next) = config_rx.recv().await {
                cache.apply_config(next.cache);
                conversations.apply_config(next.conversation);
                info!("Configuration reloaded");
            }
        })
    };

    info!(
        provider = %provider_name,
        config = %config_path.display(),
        max_entries = ?config.cache.max_entries,
        max_bytes = ?config.cache.max_bytes,
        "Wayfarer starting"
    );

    if config.api.enabled {
        let api = config.api.clone();
        let state = AppState::new(handler).with_token(api.api_token.clone());
        let server_rx = shutdown_rx.clone();
        let mut server = tokio::spawn(async move { start_server(&api, state, server_rx).await });

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.with_context(|| "Failed to listen for Ctrl-C")?;
                info!("Shutdown requested");
                let _ = shutdown_tx.send(true);
                match server.await {
                    Ok(Err(e)) => error!(error = %e, "API server error during shutdown"),
                    Err(e) => error!(error = %e, "API server task failed"),
                    Ok(Ok(())) => {}
                }
            }
            res = &mut server => {
                let _ = shutdown_tx.send(true);
                match res {
                    Ok(Ok(())) => info!("API server exited"),
                    Ok(Err(e)) => return Err(e).with_context(|| "API server failed"),
                    Err(e) => return Err(e).with_context(|| "API server task panicked"),
                }
            }
        }
    } else {
        info!("API disabled; running maintenance tasks only");
        tokio::signal::ctrl_c()
            .await
            .with_context(|| "Failed to listen for Ctrl-C")?;
        let _ = shutdown_tx.send(true);
    }

    let _ = tokio::join!(sweeper, pruner, usage_flush, watcher);
    reloader.abort();
    let stats = cache.stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        expirations = stats.expirations,
        "Wayfarer stopped"
    );
    Ok(())
}
