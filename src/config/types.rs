//! Configuration types.
//!
//! Every tunable has a named default constant; nothing is hardcoded at the
//! point of use.

use serde::{Deserialize, Serialize};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_MAX_ENTRIES: usize = 1_000;
pub const DEFAULT_MAX_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_TTL_MS: u64 = 60 * 60 * 1000;
pub const DEFAULT_OFFLOAD_THRESHOLD_FRACTION: f64 = 0.80;
pub const DEFAULT_OFFLOAD_WATERMARK_FRACTION: f64 = 0.60;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;

pub const DEFAULT_SESSION_IDLE_TIMEOUT_MS: u64 = 30 * 60 * 1000;
pub const DEFAULT_FINGERPRINT_WINDOW_SIZE: usize = 5;
pub const DEFAULT_REPEAT_MATCH_THRESHOLD: usize = 3;
pub const DEFAULT_MAX_HISTORY_TURNS: usize = 50;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.2;
pub const DEFAULT_CACHE_LOOKBACK_TURNS: usize = 3;
pub const DEFAULT_PROMPT_CONTEXT_TURNS: usize = 50;
pub const DEFAULT_PRUNE_INTERVAL_MS: u64 = 60_000;

pub const DEFAULT_API_BIND: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 9091;

pub const DEFAULT_PROVIDER_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_PROVIDER_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly travel assistant. Help the user plan trips, \
     compare destinations, and answer questions about flights, hotels and local sights.";

fn default_termination_phrases() -> Vec<String> {
    [
        "bye",
        "goodbye",
        "quit",
        "exit",
        "end",
        "end chat",
        "end conversation",
        "stop conversation",
        "that's all",
        "no thanks bye",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_reset_phrases() -> Vec<String> {
    ["start over", "reset", "restart", "new conversation", "start again"]
        .into_iter()
        .map(String::from)
        .collect()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub conversation: ConversationConfig,
    pub api: ApiConfig,
    pub provider: ProviderConfig,
}

// ============================================================================
// Cache
// ============================================================================

/// Response cache bounds, lifetime and memory-pressure offload settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry-count bound. `None` disables the count bound.
    pub max_entries: Option<usize>,
    /// Byte budget over key + value sizes. `None` disables the byte bound
    /// and with it the proactive offload.
    pub max_bytes: Option<u64>,
    /// Lifetime applied when `set` is called without an explicit TTL.
    pub default_ttl_ms: u64,
    /// Occupancy fraction of `max_bytes` above which offload starts.
    pub offload_threshold_fraction: f64,
    /// Occupancy fraction of `max_bytes` that offload evicts down to.
    pub offload_watermark_fraction: f64,
    /// Period of the background expiry sweep.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: Some(DEFAULT_MAX_ENTRIES),
            max_bytes: Some(DEFAULT_MAX_BYTES),
            default_ttl_ms: DEFAULT_TTL_MS,
            offload_threshold_fraction: DEFAULT_OFFLOAD_THRESHOLD_FRACTION,
            offload_watermark_fraction: DEFAULT_OFFLOAD_WATERMARK_FRACTION,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// Session lifetime, history bounds and repetition detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Sessions idle for longer than this are pruned.
    pub session_idle_timeout_ms: u64,
    /// Number of recent user-turn fingerprints kept (K).
    pub fingerprint_window_size: usize,
    /// Matching fingerprints in the window, newest included, that trigger
    /// the repeating state.
    pub repeat_match_threshold: usize,
    /// History is truncated to this many turns on append.
    pub max_history_turns: usize,
    /// Maximum normalized edit distance for two turns to count as
    /// near-duplicates. `0.0` means exact matches only. Turns whose numbers
    /// differ are never near-duplicates, whatever the distance.
    pub similarity_threshold: f64,
    /// Turns folded into the response cache fingerprint.
    pub cache_lookback_turns: usize,
    /// Most recent turns sent to the completion provider. Effectively
    /// capped by `max_history_turns`.
    pub prompt_context_turns: usize,
    /// Period of the background idle-session prune.
    pub prune_interval_ms: u64,
    /// Whole-message phrases that end a session.
    pub termination_phrases: Vec<String>,
    /// Whole-message phrases that reset a session.
    pub reset_phrases: Vec<String>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            session_idle_timeout_ms: DEFAULT_SESSION_IDLE_TIMEOUT_MS,
            fingerprint_window_size: DEFAULT_FINGERPRINT_WINDOW_SIZE,
            repeat_match_threshold: DEFAULT_REPEAT_MATCH_THRESHOLD,
            max_history_turns: DEFAULT_MAX_HISTORY_TURNS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            cache_lookback_turns: DEFAULT_CACHE_LOOKBACK_TURNS,
            prompt_context_turns: DEFAULT_PROMPT_CONTEXT_TURNS,
            prune_interval_ms: DEFAULT_PRUNE_INTERVAL_MS,
            termination_phrases: default_termination_phrases(),
            reset_phrases: default_reset_phrases(),
        }
    }
}

// ============================================================================
// API
// ============================================================================

/// HTTP API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Whether `serve` starts the HTTP API.
    pub enabled: bool,
    /// Bind address (default: 127.0.0.1).
    pub bind: String,
    pub port: u16,
    /// Bearer token required on every route except health. `None` disables auth.
    pub api_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: DEFAULT_API_BIND.to_string(),
            port: DEFAULT_API_PORT,
            api_token: None,
        }
    }
}

// ============================================================================
// Provider
// ============================================================================

/// OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_PROVIDER_API_BASE.to_string(),
            api_key: None,
            model: DEFAULT_PROVIDER_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_defaults() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.max_entries, Some(1_000));
        assert_eq!(cfg.max_bytes, Some(64 * 1024 * 1024));
        assert_eq!(cfg.default_ttl_ms, 3_600_000);
        assert_eq!(cfg.offload_threshold_fraction, 0.80);
        assert_eq!(cfg.offload_watermark_fraction, 0.60);
    }

    #[test]
    fn test_conversation_config_defaults() {
        let cfg = ConversationConfig::default();
        assert_eq!(cfg.session_idle_timeout_ms, 1_800_000);
        assert_eq!(cfg.fingerprint_window_size, 5);
        assert_eq!(cfg.repeat_match_threshold, 3);
        assert_eq!(cfg.prompt_context_turns, cfg.max_history_turns);
        assert!(cfg.termination_phrases.iter().any(|p| p == "goodbye"));
        assert!(cfg.reset_phrases.iter().any(|p| p == "start over"));
    }

    #[test]
    fn test_config_deserialize_partial() {
        let json = r#"{"cache": {"max_entries": 3}, "api": {"port": 3000}}"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.cache.max_entries, Some(3));
        assert_eq!(cfg.cache.default_ttl_ms, DEFAULT_TTL_MS);
        assert_eq!(cfg.api.port, 3000);
        assert_eq!(cfg.api.bind, "127.0.0.1");
        assert_eq!(cfg.conversation, ConversationConfig::default());
    }

    #[test]
    fn test_null_max_bytes_disables_byte_bound() {
        let cfg: CacheConfig = serde_json::from_str(r#"{"max_bytes": null}"#).unwrap();
        assert_eq!(cfg.max_bytes, None);
        assert_eq!(cfg.max_entries, Some(DEFAULT_MAX_ENTRIES));
    }
}
