//! Command-line interface.

pub(crate) mod chat;
pub(crate) mod config;
pub(crate) mod serve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use wayfarer::config::Config;
use wayfarer::providers::{CompletionProvider, EchoProvider, OpenAiCompatProvider};

#[derive(Parser)]
#[command(name = "wayfarer")]
#[command(version)]
#[command(about = "Response cache and conversation state service for a travel assistant")]
pub(crate) struct Cli {
    /// Config file (default: ~/.wayfarer/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the HTTP API with background cache sweeps and session pruning
    Serve {
        /// Answer with the offline echo provider instead of calling out
        #[arg(long)]
        echo: bool,
    },
    /// Interactive chat in the terminal
    Chat {
        /// Session id to use (default: a fresh one)
        #[arg(long)]
        session: Option<String>,
        /// Answer with the offline echo provider instead of calling out
        #[arg(long)]
        echo: bool,
    },
    /// Print the effective configuration
    Config {
        /// Only validate, print nothing but the result
        #[arg(long)]
        check: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Install the global tracing subscriber. `RUST_LOG` overrides
/// `default_level`.
pub(crate) fn init_tracing(format: LogFormat, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    init_tracing(cli.log_format, default_level);

    let (config, path) = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Serve { echo } => serve::cmd_serve(config, path, echo).await,
        Commands::Chat { session, echo } => chat::cmd_chat(config, session, echo).await,
        Commands::Config { check } => config::cmd_config(&config, &path, check),
    }
}

/// Load from `path`, or the default location. Returns the path that was
/// (or would be) read so it can be watched for changes.
fn load_config(path: Option<&Path>) -> Result<(Config, PathBuf)> {
    match path {
        Some(p) => {
            let config = Config::load_from_path(p)
                .with_context(|| format!("Failed to load config from {}", p.display()))?;
            Ok((config, p.to_path_buf()))
        }
        None => {
            let config = Config::load().with_context(|| "Failed to load config")?;
            Ok((config, Config::path()))
        }
    }
}

pub(crate) fn build_provider(config: &Config, echo: bool) -> Result<Arc<dyn CompletionProvider>> {
    if echo {
        return Ok(Arc::new(EchoProvider::new()));
    }
    if config.provider.api_key.is_none() {
        warn!(
            api_base = %config.provider.api_base,
            "No provider API key configured; requests are sent unauthenticated"
        );
    }
    let provider = OpenAiCompatProvider::from_config(&config.provider)
        .with_context(|| "Failed to build completion provider")?;
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_serve_with_global_flags() {
        let cli = Cli::try_parse_from([
            "wayfarer",
            "serve",
            "--echo",
            "--log-format",
            "json",
            "--config",
            "/tmp/w.toml",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Serve { echo: true }));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/w.toml")));
    }

    #[test]
    fn test_cli_parses_chat_session() {
        let cli = Cli::try_parse_from(["wayfarer", "chat", "--session", "abc"]).unwrap();
        match cli.command {
            Commands::Chat { session, echo } => {
                assert_eq!(session.as_deref(), Some("abc"));
                assert!(!echo);
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn test_load_config_explicit_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("w.yaml");
        std::fs::write(&path, "cache:\n  max_entries: 5\n").unwrap();
        let (config, loaded) = load_config(Some(&path)).unwrap();
        assert_eq!(config.cache.max_entries, Some(5));
        assert_eq!(loaded, path);
    }

    #[test]
    fn test_build_provider_echo() {
        let provider = build_provider(&Config::default(), true).unwrap();
        assert_eq!(provider.name(), "echo");
        let provider = build_provider(&Config::default(), false).unwrap();
        assert_eq!(provider.name(), "openai-compat");
    }
}
