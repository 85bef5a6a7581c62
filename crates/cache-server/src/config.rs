use crate::cache_layer::{CacheLayer, StrategyOverride};
use predictive_cache::{IntelligentConfig, StoreConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_total_size")]
    pub max_total_size_bytes: usize,
    #[serde(default = "default_true")]
    pub allow_transient_overflow: bool,
    #[serde(default)]
    pub enforce_strategy_caps: bool,
    #[serde(default = "default_max_body_size")]
    pub max_body_size_bytes: usize,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_preload_interval")]
    pub preload_interval_secs: u64,
    #[serde(default = "default_preload_limit")]
    pub preload_limit: usize,
    #[serde(default = "default_preload_threshold")]
    pub preload_threshold: f64,
    #[serde(default = "default_hint_ttl_ms")]
    pub hint_ttl_ms: u64,
    #[serde(default = "default_fixed_candidates")]
    pub fixed_candidates: Vec<String>,
    #[serde(default)]
    pub strategies: Vec<StrategyOverride>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_ttl")]
    pub default_ttl_seconds: u64,
    #[serde(default = "default_fallback_entries")]
    pub max_entries: usize,
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Config {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                url: "http://127.0.0.1:3000".to_string(),
                timeout_ms: default_timeout_ms(),
            },
            cache: CacheConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_total_size: self.max_total_size_bytes,
            allow_transient_overflow: self.allow_transient_overflow,
            enforce_strategy_caps: self.enforce_strategy_caps,
            preload_threshold: self.preload_threshold,
            preload_limit: self.preload_limit,
            hint_ttl: Duration::from_millis(self.hint_ttl_ms),
            fixed_candidates: self.fixed_candidates.clone(),
        }
    }
}

impl FallbackConfig {
    pub fn intelligent_config(&self) -> IntelligentConfig {
        IntelligentConfig {
            default_ttl: Duration::from_secs(self.default_ttl_seconds),
            max_entries: self.max_entries,
            compression_threshold: self.compression_threshold,
            ..IntelligentConfig::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            metrics_addr: default_metrics_addr(),
            language: default_language(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_total_size_bytes: default_max_total_size(),
            allow_transient_overflow: true,
            enforce_strategy_caps: false,
            max_body_size_bytes: default_max_body_size(),
            cleanup_interval_secs: default_cleanup_interval(),
            preload_interval_secs: default_preload_interval(),
            preload_limit: default_preload_limit(),
            preload_threshold: default_preload_threshold(),
            hint_ttl_ms: default_hint_ttl_ms(),
            fixed_candidates: default_fixed_candidates(),
            strategies: Vec::new(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_fallback_ttl(),
            max_entries: default_fallback_entries(),
            compression_threshold: default_compression_threshold(),
        }
    }
}

/// Compare old and new config, apply safe changes, warn about the rest.
///
/// - Strategy overrides changed → applied in place (no cache loss)
/// - Byte budget, intervals or fallback settings changed → WARN, restart required
pub fn diff_and_apply(old: &Config, new: &Config, cache: &CacheLayer) {
    if old.cache.strategies != new.cache.strategies {
        cache.apply_overrides(&new.cache.strategies);
        tracing::info!(
            strategies = new.cache.strategies.len(),
            "config reloaded: strategy overrides applied"
        );
    }

    if old.cache.max_total_size_bytes != new.cache.max_total_size_bytes {
        tracing::warn!(
            old = old.cache.max_total_size_bytes,
            new = new.cache.max_total_size_bytes,
            "byte budget change detected, ignoring. Restart to resize cache safely"
        );
    }

    let timing_changed = old.cache.cleanup_interval_secs != new.cache.cleanup_interval_secs
        || old.cache.preload_interval_secs != new.cache.preload_interval_secs;
    let preload_changed = old.cache.preload_limit != new.cache.preload_limit
        || old.cache.preload_threshold != new.cache.preload_threshold
        || old.cache.hint_ttl_ms != new.cache.hint_ttl_ms
        || old.cache.fixed_candidates != new.cache.fixed_candidates;
    if timing_changed || preload_changed || old.fallback != new.fallback {
        tracing::warn!("maintenance, preload or fallback settings changed, restart to apply");
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_true() -> bool {
    true
}
fn default_max_total_size() -> usize {
    50 * 1024 * 1024
}
fn default_max_body_size() -> usize {
    1_048_576
}
fn default_cleanup_interval() -> u64 {
    300
}
fn default_preload_interval() -> u64 {
    30
}
fn default_preload_limit() -> usize {
    5
}
fn default_preload_threshold() -> f64 {
    0.5
}
fn default_hint_ttl_ms() -> u64 {
    5000
}
fn default_fixed_candidates() -> Vec<String> {
    vec!["/".to_string(), "/api/hospitals".to_string()]
}
fn default_fallback_ttl() -> u64 {
    300
}
fn default_fallback_entries() -> usize {
    100
}
fn default_compression_threshold() -> usize {
    1024
}
