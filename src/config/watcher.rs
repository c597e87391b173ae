//! Hot reload of cache and conversation tunables.
//!
//! The watcher polls the config file's modification time. A changed file is
//! re-parsed and validated; valid configs are sent to the receiver, invalid
//! ones are logged and the running configuration stays in effect.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Polling config file watcher.
pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
    last_mtime: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: PathBuf, poll_interval: Duration) -> Self {
        let last_mtime = modified_at(&path);
        Self {
            path,
            poll_interval,
            last_mtime,
        }
    }

    /// Check the file once. Returns a freshly loaded config when the file
    /// changed since the last check and the new contents are valid.
    pub fn poll_once(&mut self) -> Option<Config> {
        let current = modified_at(&self.path);
        let changed = match (self.last_mtime, current) {
            (Some(prev), Some(next)) => prev != next,
            (None, Some(_)) => true,
            _ => false,
        };
        if !changed {
            return None;
        }
        self.last_mtime = current;

        match Config::load_from_path(&self.path) {
            Ok(config) => {
                debug!(path = %self.path.display(), "Config file changed, reloading");
                Some(config)
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Config reload rejected; keeping running configuration"
                );
                None
            }
        }
    }

    /// Poll until `shutdown_rx` flips to `true` or the receiver goes away.
    pub async fn watch(
        mut self,
        tx: mpsc::UnboundedSender<Config>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Config watcher shutting down");
                        return;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if let Some(config) = self.poll_once() {
                if tx.send(config).is_err() {
                    warn!("Config receiver dropped, stopping watcher");
                    return;
                }
            }
        }
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
