//! LLM response caching with TTL expiry, LRU eviction and memory-pressure offload.

pub mod response_cache;
pub mod sweeper;

pub use response_cache::{CacheLookup, CacheStats, CacheValue, ResponseCache};
pub use sweeper::spawn_sweeper;
