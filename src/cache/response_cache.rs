//! In-memory LLM response cache with TTL expiry, LRU eviction and
//! memory-pressure offload.
//!
//! Keys are request fingerprints (see
//! [`ConversationManager::build_fingerprint`](crate::session::ConversationManager::build_fingerprint)),
//! values are opaque serialized responses.
//!
//! # Eviction
//!
//! - An entry is visible only while `now < created_at + ttl`. Expired
//!   entries are dropped when touched by `get`, before any capacity
//!   eviction, and by [`ResponseCache::sweep_expired`].
//! - Among live entries the least recently used goes first. Recency is a
//!   logical touch sequence bumped on insert and on every hit, so entries
//!   that were never read after insertion leave in insertion order.
//! - When the byte total rises above `offload_threshold_fraction` of
//!   `max_bytes`, the coldest entries are evicted until the total is at or
//!   below `offload_watermark_fraction` of `max_bytes`.
//!
//! All bookkeeping sits behind one mutex; no operation performs I/O while
//! holding it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::error::{Result, WayfarerError};
use crate::utils::clock::{Clock, SystemClock};

/// Number of keys removed per lock acquisition during a sweep.
const SWEEP_BATCH: usize = 256;

// ============================================================================
// Values
// ============================================================================

/// Opaque cached payload. Cloning is a reference-count bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValue(Arc<[u8]>);

impl CacheValue {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The payload as UTF-8, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(v: Vec<u8>) -> Self {
        Self(v.into())
    }
}

impl From<&[u8]> for CacheValue {
    fn from(v: &[u8]) -> Self {
        Self(v.into())
    }
}

impl From<String> for CacheValue {
    fn from(v: String) -> Self {
        Self(v.into_bytes().into())
    }
}

impl From<&str> for CacheValue {
    fn from(v: &str) -> Self {
        Self(v.as_bytes().into())
    }
}

/// Outcome of [`ResponseCache::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(CacheValue),
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn into_value(self) -> Option<CacheValue> {
        match self {
            CacheLookup::Hit(v) => Some(v),
            CacheLookup::Miss => None,
        }
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Point-in-time cache statistics.
///
/// Counters only grow; they are zeroed solely by
/// [`ResponseCache::reset_stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to satisfy a capacity bound or an offload.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Number of memory-pressure offload runs.
    pub offloads: u64,
    /// Entries currently stored (including expired ones not yet purged).
    pub entries: usize,
    /// Sum of key and value sizes currently stored.
    pub bytes: u64,
    pub max_entries: Option<usize>,
    pub max_bytes: Option<u64>,
    /// `hits / (hits + misses)`, `0.0` before the first lookup.
    pub hit_rate: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    offloads: u64,
}

// ============================================================================
// Entries
// ============================================================================

#[derive(Debug)]
struct CacheEntry {
    value: CacheValue,
    created_at_ms: u64,
    last_accessed_ms: u64,
    expires_at_ms: u64,
    size_bytes: u64,
    /// Position in the recency index. Higher is more recent.
    touch_seq: u64,
    /// Sequence at insertion; tie-breaks the expiry index.
    insert_seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    fn expiry_slot(&self) -> (u64, u64) {
        (self.expires_at_ms, self.insert_seq)
    }
}

#[derive(Debug)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// touch_seq -> key, ascending from coldest to hottest.
    recency: BTreeMap<u64, String>,
    /// (expires_at_ms, insert_seq) -> key, soonest deadline first.
    expiry: BTreeMap<(u64, u64), String>,
    next_seq: u64,
    used_bytes: u64,
    config: CacheConfig,
    counters: Counters,
}

impl CacheInner {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.touch_seq);
        self.expiry.remove(&entry.expiry_slot());
        self.used_bytes = self.used_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn touch(&mut self, key: &str, now_ms: u64) -> Option<CacheValue> {
        let seq = self.next_seq();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.touch_seq);
        entry.touch_seq = seq;
        entry.last_accessed_ms = now_ms;
        self.recency.insert(seq, key.to_string());
        Some(entry.value.clone())
    }

    fn has_expired(&self, now_ms: u64) -> bool {
        self.expiry
            .first_key_value()
            .is_some_and(|((deadline, _), _)| *deadline <= now_ms)
    }

    /// Drop up to `limit` expired entries, soonest deadline first. Only the
    /// expired prefix of the expiry index is visited.
    fn purge_expired(&mut self, now_ms: u64, limit: usize) -> usize {
        let mut purged = 0usize;
        for _ in 0..limit {
            if !self.has_expired(now_ms) {
                break;
            }
            let Some((_, key)) = self.expiry.pop_first() else {
                break;
            };
            if let Some(removed) = self.entries.remove(&key) {
                self.recency.remove(&removed.touch_seq);
                self.used_bytes = self.used_bytes.saturating_sub(removed.size_bytes);
                purged += 1;
            }
        }
        self.counters.expirations += purged as u64;
        purged
    }

    /// Evict the coldest entry. Returns `false` when empty.
    fn evict_lru(&mut self) -> bool {
        let Some((_, key)) = self.recency.pop_first() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&key) {
            self.expiry.remove(&entry.expiry_slot());
            self.used_bytes = self.used_bytes.saturating_sub(entry.size_bytes);
            self.counters.evictions += 1;
            debug!(
                key = %short_key(&key),
                idle_ms = entry.last_accessed_ms.saturating_sub(entry.created_at_ms),
                "Evicting LRU cache entry"
            );
        }
        true
    }

    fn over_entry_bound(&self) -> bool {
        self.config
            .max_entries
            .is_some_and(|max| self.entries.len() > max)
    }

    fn offload_threshold_bytes(&self) -> Option<u64> {
        self.config
            .max_bytes
            .map(|max| fraction_of(max, self.config.offload_threshold_fraction))
    }

    fn offload_watermark_bytes(&self) -> Option<u64> {
        self.config
            .max_bytes
            .map(|max| fraction_of(max, self.config.offload_watermark_fraction))
    }

    fn over_offload_threshold(&self) -> bool {
        self.offload_threshold_bytes()
            .is_some_and(|threshold| self.used_bytes > threshold)
    }

    /// Bring the cache back within its bounds. The most recently touched
    /// entry is never evicted here.
    fn enforce_capacity(&mut self, now_ms: u64) {
        if !self.over_entry_bound() && !self.over_offload_threshold() {
            return;
        }

        // Expired entries go before any live entry is sacrificed.
        self.purge_expired(now_ms, usize::MAX);

        while self.over_entry_bound() && self.entries.len() > 1 {
            self.evict_lru();
        }

        if self.over_offload_threshold() {
            let target = self.offload_watermark_bytes().unwrap_or(u64::MAX);
            let before = self.used_bytes;
            let mut evicted = 0usize;
            while self.used_bytes > target && self.entries.len() > 1 {
                if !self.evict_lru() {
                    break;
                }
                evicted += 1;
            }
            self.counters.offloads += 1;
            debug!(
                before_bytes = before,
                after_bytes = self.used_bytes,
                target_bytes = target,
                evicted,
                "Memory pressure offload"
            );
        }
    }

    fn snapshot(&self) -> CacheStats {
        let c = self.counters;
        let lookups = c.hits + c.misses;
        CacheStats {
            hits: c.hits,
            misses: c.misses,
            evictions: c.evictions,
            expirations: c.expirations,
            offloads: c.offloads,
            entries: self.entries.len(),
            bytes: self.used_bytes,
            max_entries: self.config.max_entries,
            max_bytes: self.config.max_bytes,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                c.hits as f64 / lookups as f64
            },
        }
    }
}

// ============================================================================
// ResponseCache
// ============================================================================

/// Bounded in-memory response cache.
///
/// Construct one per application and share it behind an `Arc`.
///
/// ```
/// use wayfarer::cache::{CacheLookup, ResponseCache};
/// use wayfarer::config::CacheConfig;
///
/// let cache = ResponseCache::new(CacheConfig::default());
/// cache.set("fp-1", "Try the Louvre early in the morning.", None).unwrap();
/// assert!(cache.get("fp-1").unwrap().is_hit());
/// assert_eq!(cache.get("fp-2").unwrap(), CacheLookup::Miss);
/// ```
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    /// Create a cache on the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a cache on an explicit clock.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                expiry: BTreeMap::new(),
                next_seq: 0,
                used_bytes: 0,
                config,
                counters: Counters::default(),
            }),
            clock,
        }
    }

    /// Look up `key`.
    ///
    /// A hit refreshes the entry's recency. An expired entry is removed and
    /// reported as a miss, and counted as an expiration.
    ///
    /// # Errors
    ///
    /// Returns [`WayfarerError::InvalidKey`] for an empty key.
    pub fn get(&self, key: &str) -> Result<CacheLookup> {
        validate_key(key)?;
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();

        let expired = inner.entries.get(key).map(|e| e.is_expired(now));
        match expired {
            None => {
                inner.counters.misses += 1;
                debug!(key = %short_key(key), "Cache miss");
                Ok(CacheLookup::Miss)
            }
            Some(true) => {
                inner.remove(key);
                inner.counters.expirations += 1;
                inner.counters.misses += 1;
                debug!(key = %short_key(key), "Cache entry expired");
                Ok(CacheLookup::Miss)
            }
            Some(false) => {
                inner.counters.hits += 1;
                debug!(key = %short_key(key), "Cache hit");
                Ok(inner
                    .touch(key, now)
                    .map_or(CacheLookup::Miss, CacheLookup::Hit))
            }
        }
    }

    /// Insert or replace `key`.
    ///
    /// `ttl` defaults to the configured `default_ttl_ms`. The insert may
    /// evict other entries to stay within bounds. A value larger than the
    /// whole byte budget is not stored, and any previous value under `key`
    /// is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`WayfarerError::InvalidKey`] for an empty key.
    pub fn set(
        &self,
        key: &str,
        value: impl Into<CacheValue>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        validate_key(key)?;
        let value = value.into();
        let now = self.clock.now_ms();
        let size_bytes = (key.len() + value.len()) as u64;
        let mut inner = self.inner.lock();

        inner.remove(key);

        if inner.config.max_bytes.is_some_and(|max| size_bytes > max) {
            debug!(
                key = %short_key(key),
                size_bytes,
                "Value exceeds cache byte budget, not caching"
            );
            return Ok(());
        }

        let ttl_ms = ttl
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(inner.config.default_ttl_ms);
        let seq = inner.next_seq();
        let entry = CacheEntry {
            value,
            created_at_ms: now,
            last_accessed_ms: now,
            expires_at_ms: now.saturating_add(ttl_ms),
            size_bytes,
            touch_seq: seq,
            insert_seq: seq,
        };
        inner.expiry.insert(entry.expiry_slot(), key.to_string());
        inner.entries.insert(key.to_string(), entry);
        inner.recency.insert(seq, key.to_string());
        inner.used_bytes += size_bytes;

        inner.enforce_capacity(now);
        Ok(())
    }

    /// Snapshot of counters and occupancy. No side effects.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().snapshot()
    }

    /// Drop every entry. Counters are kept and the dropped entries are not
    /// counted as evictions.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.recency.clear();
        inner.expiry.clear();
        inner.used_bytes = 0;
        info!(dropped, "Response cache cleared");
    }

    /// Zero all counters. Entries are untouched.
    pub fn reset_stats(&self) {
        self.inner.lock().counters = Counters::default();
        info!("Response cache statistics reset");
    }

    /// Remove every expired entry and return how many were removed.
    ///
    /// Expired keys are taken from the front of the expiry index in small
    /// batches, one lock acquisition per batch, so concurrent `get`/`set`
    /// calls are never blocked for the whole pass.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0usize;
        loop {
            let mut inner = self.inner.lock();
            removed += inner.purge_expired(now, SWEEP_BATCH);
            if !inner.has_expired(now) {
                break;
            }
        }

        if removed > 0 {
            info!(removed, "Swept expired cache entries");
        }
        removed
    }

    /// Replace bounds and TTL defaults. Existing entries keep their TTL; a
    /// tighter bound takes effect immediately.
    pub fn apply_config(&self, config: CacheConfig) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        if inner.config != config {
            info!(
                max_entries = ?config.max_entries,
                max_bytes = ?config.max_bytes,
                default_ttl_ms = config.default_ttl_ms,
                "Applying cache configuration"
            );
        }
        inner.config = config;
        inner.enforce_capacity(now);
    }

    /// Current configuration.
    pub fn config(&self) -> CacheConfig {
        self.inner.lock().config.clone()
    }

    /// `true` if a live entry exists. Does not affect recency or counters.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Sum of key and value sizes currently stored.
    pub fn used_bytes(&self) -> u64 {
        self.inner.lock().used_bytes
    }
}

// -- helpers -----------------------------------------------------------------

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(WayfarerError::InvalidKey(
            "cache key must not be empty".into(),
        ));
    }
    Ok(())
}

/// `max * fraction`, rounded to the nearest byte.
fn fraction_of(max: u64, fraction: f64) -> u64 {
    (max as f64 * fraction).round() as u64
}

fn short_key(key: &str) -> String {
    key.chars().take(8).collect()
}
