//! Runtime configuration for the serve command.
//!
//! Loading order:
//!
//! 1. `--config <path>` (must exist and parse)
//! 2. `NAVIGATOR_CONFIG` environment variable (path to a TOML file)
//! 3. Built-in defaults
//!
//! The inference API key never lives in the file; it is read from the
//! environment variable named by `inference.api_key_env`.

use std::path::Path;

use anyhow::{Context, anyhow};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub inference: InferenceConfig,
    pub query: QueryLimits,
}

/// Settings for the optional natural-language inference collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    pub enabled: bool,
    /// Base URL of an OpenAI-compatible chat-completions API.
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Per-call deadline, kept shorter than the overall request budget so an
    /// unavailable collaborator degrades to the deterministic extractor.
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 8,
        }
    }
}

impl InferenceConfig {
    /// The collaborator counts as configured only when enabled and keyed.
    pub fn api_key(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Bounds and defaults applied when promoting a draft to a QuerySpec.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryLimits {
    pub default_radius_km: f64,
    pub max_radius_km: f64,
    pub default_limit: usize,
    pub max_limit: usize,
    /// Cap on coarse-filter candidates pulled from the index before the exact
    /// distance pass.
    pub coarse_limit: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_radius_km: 40.0,
            max_radius_km: 500.0,
            default_limit: 10,
            max_limit: 50,
            coarse_limit: 1000,
        }
    }
}

impl AppConfig {
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(env_path) = std::env::var("NAVIGATOR_CONFIG") {
            let env_path = env_path.trim();
            if !env_path.is_empty() {
                return Self::from_file(Path::new(env_path));
            }
        }
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|e| anyhow!("parse config {}: {}", path.display(), e))?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_query_bounds() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.query.default_radius_km, 40.0);
        assert_eq!(cfg.query.max_radius_km, 500.0);
        assert_eq!(cfg.query.default_limit, 10);
        assert_eq!(cfg.query.max_limit, 50);
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [inference]
            enabled = false

            [query]
            max_radius_km = 250.0
        "#,
        )
        .unwrap();
        assert!(!cfg.inference.enabled);
        assert_eq!(cfg.query.max_radius_km, 250.0);
        assert_eq!(cfg.query.default_limit, 10);
        assert!(cfg.inference.api_key().is_none());
    }
}
