//! Background removal of idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::ConversationManager;

/// Call [`ConversationManager::prune_idle`] every `interval` until
/// `shutdown_rx` signals `true`.
pub fn spawn_pruner(
    manager: Arc<ConversationManager>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let pruned = manager.prune_idle();
                    debug!(pruned, active = manager.len(), "Session prune tick");
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Session pruner shutting down");
                        break;
                    }
                }
            }
        }
    })
}
