//! Configuration loading, environment overrides and validation.
//!
//! The default location is `~/.wayfarer/config.json`. Other formats are
//! picked by file extension: `.json5`, `.toml`, `.yaml`/`.yml`. After the
//! file is parsed, `WAYFARER_*` environment variables override individual
//! fields, and the result is validated before it is handed out.

pub mod types;
pub mod watcher;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, WayfarerError};

pub use types::*;

impl Config {
    /// Wayfarer home directory (`~/.wayfarer`).
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wayfarer")
    }

    /// Default config file path.
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load from the default path. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        let path = Self::path();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            let mut config = Self::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load, override from the environment and validate.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::parse(path, &raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn parse(path: &Path, raw: &str) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let parsed = match ext.as_str() {
            "json5" => json5::from_str(raw).map_err(|e| e.to_string()),
            "toml" => toml::from_str(raw).map_err(|e| e.to_string()),
            "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
            _ => serde_json::from_str(raw).map_err(|e| e.to_string()),
        };
        parsed.map_err(|e| {
            WayfarerError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply `WAYFARER_*` environment overrides. Unparseable values are
    /// logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>("WAYFARER_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = Some(v);
        }
        if let Some(v) = env_parse::<u64>("WAYFARER_CACHE_MAX_BYTES") {
            self.cache.max_bytes = Some(v);
        }
        if let Some(v) = env_parse("WAYFARER_CACHE_DEFAULT_TTL_MS") {
            self.cache.default_ttl_ms = v;
        }
        if let Some(v) = env_parse("WAYFARER_CACHE_OFFLOAD_THRESHOLD") {
            self.cache.offload_threshold_fraction = v;
        }
        if let Some(v) = env_parse("WAYFARER_CACHE_OFFLOAD_WATERMARK") {
            self.cache.offload_watermark_fraction = v;
        }
        if let Some(v) = env_parse("WAYFARER_SESSION_IDLE_TIMEOUT_MS") {
            self.conversation.session_idle_timeout_ms = v;
        }
        if let Some(v) = env_parse("WAYFARER_FINGERPRINT_WINDOW_SIZE") {
            self.conversation.fingerprint_window_size = v;
        }
        if let Some(v) = env_parse("WAYFARER_REPEAT_MATCH_THRESHOLD") {
            self.conversation.repeat_match_threshold = v;
        }
        if let Some(v) = env_parse("WAYFARER_MAX_HISTORY_TURNS") {
            self.conversation.max_history_turns = v;
        }
        if let Some(v) = env_parse("WAYFARER_PROMPT_CONTEXT_TURNS") {
            self.conversation.prompt_context_turns = v;
        }
        if let Some(v) = env_parse("WAYFARER_API_PORT") {
            self.api.port = v;
        }
        if let Ok(v) = std::env::var("WAYFARER_API_BIND") {
            self.api.bind = v;
        }
        if let Ok(v) = std::env::var("WAYFARER_API_TOKEN") {
            self.api.api_token = Some(v).filter(|t| !t.is_empty());
        }
        if let Ok(v) = std::env::var("WAYFARER_PROVIDER_API_BASE") {
            self.provider.api_base = v;
        }
        if let Ok(v) = std::env::var("WAYFARER_PROVIDER_API_KEY") {
            self.provider.api_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Ok(v) = std::env::var("WAYFARER_PROVIDER_MODEL") {
            self.provider.model = v;
        }
    }

    /// Reject configurations the cache or conversation manager cannot honour.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.conversation.validate()?;
        Ok(())
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_entries.is_none() && self.max_bytes.is_none() {
            return Err(config_err(
                "cache needs at least one of max_entries or max_bytes",
            ));
        }
        if self.max_entries == Some(0) {
            return Err(config_err("cache.max_entries must be greater than 0"));
        }
        if self.max_bytes == Some(0) {
            return Err(config_err("cache.max_bytes must be greater than 0"));
        }
        if self.default_ttl_ms == 0 {
            return Err(config_err("cache.default_ttl_ms must be greater than 0"));
        }
        check_fraction(
            "cache.offload_threshold_fraction",
            self.offload_threshold_fraction,
        )?;
        check_fraction(
            "cache.offload_watermark_fraction",
            self.offload_watermark_fraction,
        )?;
        if self.offload_watermark_fraction >= self.offload_threshold_fraction {
            return Err(config_err(
                "cache.offload_watermark_fraction must be below offload_threshold_fraction",
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(config_err("cache.sweep_interval_ms must be greater than 0"));
        }
        Ok(())
    }
}

impl ConversationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fingerprint_window_size == 0 {
            return Err(config_err(
                "conversation.fingerprint_window_size must be greater than 0",
            ));
        }
        if self.repeat_match_threshold < 2
            || self.repeat_match_threshold > self.fingerprint_window_size
        {
            return Err(config_err(
                "conversation.repeat_match_threshold must be between 2 and fingerprint_window_size",
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(config_err(
                "conversation.similarity_threshold must be within [0, 1]",
            ));
        }
        if self.max_history_turns == 0 {
            return Err(config_err(
                "conversation.max_history_turns must be greater than 0",
            ));
        }
        if self.prompt_context_turns == 0 {
            return Err(config_err(
                "conversation.prompt_context_turns must be greater than 0",
            ));
        }
        if self.session_idle_timeout_ms == 0 || self.prune_interval_ms == 0 {
            return Err(config_err(
                "conversation idle timeout and prune interval must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(config_err(&format!("{name} must be within (0, 1], got {value}")))
    }
}

fn config_err(msg: &str) -> WayfarerError {
    WayfarerError::Config(msg.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}
