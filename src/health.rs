//! Process health and usage counters.
//!
//! Provides:
//! - [`HealthSnapshot`] for `GET /api/health` (status, version, uptime, RSS)
//! - [`UsageMetrics`] for lock-free per-request counters
//! - [`start_periodic_usage_flush`] for periodic metric emission to the log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

const USAGE_FLUSH_INTERVAL_SECS: u64 = 60;

// ============================================================================
// Platform RSS helper
// ============================================================================

/// Current process RSS in bytes, or `None` on unsupported platforms.
///
/// On Linux this reads the resident page count from `/proc/self/statm`
/// and multiplies by `sysconf(_SC_PAGESIZE)`.
pub fn get_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        // Format: size resident shared text lib data dt (pages)
        let content = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = content.split_whitespace().nth(1)?.parse().ok()?;
        // SAFETY: sysconf has no preconditions.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page_size <= 0 {
            return None;
        }
        Some(resident_pages * page_size as u64)
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

// ============================================================================
// Health snapshot
// ============================================================================

/// Body of the liveness endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub rss_bytes: Option<u64>,
}

impl HealthSnapshot {
    pub fn capture(started: Instant) -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: started.elapsed().as_secs(),
            rss_bytes: get_rss_bytes(),
        }
    }
}

// ============================================================================
// UsageMetrics
// ============================================================================

/// Lock-free chat counters.
#[derive(Debug, Default)]
pub struct UsageMetrics {
    pub requests: AtomicU64,
    pub cache_replies: AtomicU64,
    pub provider_calls: AtomicU64,
    pub errors: AtomicU64,
}

/// Point-in-time copy of [`UsageMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub requests: u64,
    pub cache_replies: u64,
    pub provider_calls: u64,
    pub errors: u64,
}

impl UsageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_reply(&self) {
        self.cache_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_call(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_replies: self.cache_replies.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Log the current counters.
    pub fn emit_usage(&self, reason: &str) {
        let s = self.snapshot();
        info!(
            reason,
            requests = s.requests,
            cache_replies = s.cache_replies,
            provider_calls = s.provider_calls,
            errors = s.errors,
            "usage"
        );
    }
}

/// Emit usage metrics every 60 seconds, plus a final `shutdown` summary
/// when `shutdown_rx` signals `true`.
pub fn start_periodic_usage_flush(
    metrics: Arc<UsageMetrics>,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(USAGE_FLUSH_INTERVAL_SECS));
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics.emit_usage("periodic");
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        metrics.emit_usage("shutdown");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_metrics_recording() {
        let m = UsageMetrics::new();
        m.record_request();
        m.record_request();
        m.record_cache_reply();
        m.record_provider_call();
        m.record_error();
        assert_eq!(
            m.snapshot(),
            UsageSnapshot {
                requests: 2,
                cache_replies: 1,
                provider_calls: 1,
                errors: 1,
            }
        );
    }

    #[test]
    fn test_health_snapshot() {
        let snap = HealthSnapshot::capture(Instant::now());
        assert_eq!(snap.status, "ok");
        assert!(!snap.version.is_empty());
        assert_eq!(snap.uptime_secs, 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_rss_available_on_linux() {
        assert!(get_rss_bytes().unwrap_or(0) > 0);
    }

    #[tokio::test]
    async fn test_usage_flush_stops_on_shutdown() {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = start_periodic_usage_flush(Arc::new(UsageMetrics::new()), rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
