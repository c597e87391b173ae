//! `wayfarer config`: print or validate the effective configuration.

use std::path::Path;

use anyhow::Result;

use wayfarer::config::Config;

pub(crate) fn cmd_config(config: &Config, path: &Path, check: bool) -> Result<()> {
    if check {
        // Loading already validated it.
        println!("Configuration OK ({})", path.display());
        return Ok(());
    }
    println!("# {}", path.display());
    println!("{}", render_redacted(config)?);
    Ok(())
}

/// Pretty JSON with secrets masked.
fn render_redacted(config: &Config) -> Result<String> {
    let mut shown = config.clone();
    if shown.provider.api_key.is_some() {
        shown.provider.api_key = Some("[REDACTED]".into());
    }
    if shown.api.api_token.is_some() {
        shown.api.api_token = Some("[REDACTED]".into());
    }
    Ok(serde_json::to_string_pretty(&shown)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_redacts_secrets() {
        let mut config = Config::default();
        config.provider.api_key = Some("sk-live-123".into());
        config.api.api_token = Some("admin-token".into());
        let out = render_redacted(&config).unwrap();
        assert!(!out.contains("sk-live-123"));
        assert!(!out.contains("admin-token"));
        assert!(out.contains("\"max_entries\": 1000"));
    }
}
