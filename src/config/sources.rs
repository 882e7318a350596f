// src/config/sources.rs
use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::types::SourceConfig;

pub const ENV_PATH: &str = "SOURCES_CONFIG_PATH";

/// Load source configs from an explicit path. Supports TOML or JSON formats.
pub fn load_sources_from(path: &Path) -> Result<Vec<SourceConfig>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_sources(&content, ext.as_str())
}

/// Load source configs using env var + fallbacks:
/// 1) $SOURCES_CONFIG_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
/// 4) built-in seed of the three providers
pub fn load_sources_default() -> Result<Vec<SourceConfig>> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        }
        return Err(anyhow!("SOURCES_CONFIG_PATH points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    tracing::info!("no sources config found; using built-in providers");
    Ok(default_sources())
}

/// The three built-in providers. `COINDESK_API_KEY` is attached when set.
pub fn default_sources() -> Vec<SourceConfig> {
    let mut coindesk =
        SourceConfig::new("coindesk", "coindesk", "https://data-api.coindesk.com").with_priority(1);
    if let Ok(key) = std::env::var("COINDESK_API_KEY") {
        if !key.trim().is_empty() {
            coindesk = coindesk.with_api_key(key.trim());
        }
    }
    vec![
        coindesk,
        SourceConfig::new("cointelegraph", "cointelegraph", "https://cointelegraph.com/rss")
            .with_priority(2),
        SourceConfig::new("decrypt", "decrypt", "https://decrypt.co/feed").with_priority(3),
    ]
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<SourceConfig>> {
    let try_toml = hint_ext == "toml" || (hint_ext != "json" && s.contains("[[sources]]"));
    if try_toml {
        return parse_toml(s);
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    parse_toml(s).map_err(|_| anyhow!("unsupported sources format"))
}

fn parse_toml(s: &str) -> Result<Vec<SourceConfig>> {
    #[derive(serde::Deserialize)]
    struct TomlSources {
        #[serde(default)]
        sources: Vec<SourceConfig>,
    }
    let v: TomlSources = toml::from_str(s).context("parsing sources TOML")?;
    Ok(clean_list(v.sources))
}

fn parse_json(s: &str) -> Result<Vec<SourceConfig>> {
    let v: Vec<SourceConfig> = serde_json::from_str(s).context("parsing sources JSON")?;
    Ok(clean_list(v))
}

/// Trim names, drop blank ones, keep the first entry per name.
fn clean_list(items: Vec<SourceConfig>) -> Vec<SourceConfig> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for mut it in items {
        it.name = it.name.trim().to_string();
        if it.name.is_empty() {
            continue;
        }
        if !seen.insert(it.name.clone()) {
            tracing::warn!(source = %it.name, "duplicate source in config; keeping first");
            continue;
        }
        out.push(it);
    }
    out
}
