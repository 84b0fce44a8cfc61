//! Engine configuration.
//!
//! Settings are plain serde structs with defaults so a partial JSON file is valid.
//! Environment variables prefixed with `DOCWEAVE_` override whatever the file says.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Skip id/date/relative-time conversion of where clauses.
    #[serde(default)]
    pub disable_type_conversions: bool,
    /// Base type of the principal (user) model.
    #[serde(default = "EngineConfig::default_principal_model")]
    pub principal_model: String,
    /// Base types at which the ownership walk stops.
    #[serde(default = "EngineConfig::default_terminal_models")]
    pub terminal_models: Vec<String>,
    #[serde(default = "EngineConfig::default_max_ownership_depth")]
    pub max_ownership_depth: usize,
    /// Datasource assigned to schemas that do not name one.
    #[serde(default = "EngineConfig::default_datasource")]
    pub default_datasource: String,
    /// TTL used when a cache policy omits one.
    #[serde(default = "EngineConfig::default_cache_ttl_secs")]
    pub default_cache_ttl_secs: u64,
}

impl EngineConfig {
    fn default_principal_model() -> String { "User".to_string() }
    fn default_terminal_models() -> Vec<String> { vec!["User".to_string(), "App".to_string()] }
    fn default_max_ownership_depth() -> usize { 8 }
    fn default_datasource() -> String { "db".to_string() }
    fn default_cache_ttl_secs() -> u64 { 300 }

    /// Read a JSON config file. A missing file yields defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            debug!(target: "docweave::config", "config file {} not found; using defaults", path.display());
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)
            .map_err(|e| AppError::io("config_read_failed".to_string(), format!("{}: {}", path.display(), e)))?;
        let cfg: EngineConfig = serde_json::from_slice(&bytes)?;
        Ok(cfg)
    }

    /// Apply `DOCWEAVE_*` environment overrides in place.
    pub fn apply_env(&mut self) {
        if let Some(b) = parse_bool_env("DOCWEAVE_DISABLE_TYPE_CONVERSIONS") { self.disable_type_conversions = b; }
        if let Ok(v) = env::var("DOCWEAVE_PRINCIPAL_MODEL") {
            if !v.trim().is_empty() { self.principal_model = v.trim().to_string(); }
        }
        if let Some(d) = parse_num_env::<usize>("DOCWEAVE_MAX_OWNERSHIP_DEPTH") { self.max_ownership_depth = d; }
        if let Ok(v) = env::var("DOCWEAVE_DEFAULT_DATASOURCE") {
            if !v.trim().is_empty() { self.default_datasource = v.trim().to_string(); }
        }
        if let Some(t) = parse_num_env::<u64>("DOCWEAVE_CACHE_TTL_SECS") { self.default_cache_ttl_secs = t; }
    }

    /// Whether the walk should stop at a model of this base type.
    pub fn is_terminal(&self, base: &str) -> bool {
        base == self.principal_model || self.terminal_models.iter().any(|t| t == base)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            disable_type_conversions: false,
            principal_model: Self::default_principal_model(),
            terminal_models: Self::default_terminal_models(),
            max_ownership_depth: Self::default_max_ownership_depth(),
            default_datasource: Self::default_datasource(),
            default_cache_ttl_secs: Self::default_cache_ttl_secs(),
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_bool_env(name: &str) -> Option<bool> {
    match env::var(name) {
        Ok(v) => parse_bool(&v),
        Err(_) => None,
    }
}

fn parse_num_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}
