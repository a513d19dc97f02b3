//! Runtime configuration (spec §6 "Configuration")
//!
//! Defaults match the bracketed values in the spec. Overridden by an
//! optional TOML file, then by `MEMORIA_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MemoriaError, Result};
use crate::types::SearchWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dimensions: usize,
    pub provider_endpoint: Option<String>,
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            dimensions: 1024,
            provider_endpoint: None,
            model: "text-embedding-3-small".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub rps: f64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig { rps: 5.0, burst: 10 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub per_call_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig { per_call_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub rate_limit: RateLimitConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            rate_limit: RateLimitConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub threshold: f32,
    pub require_approval: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        DedupConfig {
            threshold: 0.95,
            require_approval: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupScheduleConfig {
    pub schedule_cron: String,
}

impl Default for DedupScheduleConfig {
    fn default() -> Self {
        DedupScheduleConfig {
            schedule_cron: "0 4 * * 0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizeConfig {
    pub min_age_days: u32,
    pub min_length: usize,
    pub target_length: usize,
    /// Always `true`: summarizing never discards the original text (spec §4.5 invariant).
    pub preserve_original: bool,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        SummarizeConfig {
            min_age_days: 30,
            min_length: 1000,
            target_length: 200,
            preserve_original: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    Archive,
    Delete,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        ExpiryPolicy::Archive
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    pub default_policy: ExpiryPolicy,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        ExpiryConfig {
            default_policy: ExpiryPolicy::Archive,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_timeout_min: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig { idle_timeout_min: 1440 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub weights: SearchWeights,
    pub recency_tau_days: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            weights: SearchWeights::default(),
            recency_tau_days: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultSharePolicyKind {
    Private,
    Shared,
}

impl Default for DefaultSharePolicyKind {
    fn default() -> Self {
        DefaultSharePolicyKind::Private
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    pub default_policy: DefaultSharePolicyKind,
    pub smart_defaults_enabled: bool,
}

impl Default for SharingConfig {
    fn default() -> Self {
        SharingConfig {
            default_policy: DefaultSharePolicyKind::Private,
            smart_defaults_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    pub retention_days: u32,
}

impl Default for UndoConfig {
    fn default() -> Self {
        UndoConfig { retention_days: 7 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig { retention_days: 90 }
    }
}

/// Where the primary record/vector/graph store lives on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "127.0.0.1:8900".to_string(),
        }
    }
}

/// Top-level engine configuration (spec §6 "Configuration")
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub dedup: DedupConfig,
    pub dedup_schedule: DedupScheduleConfig,
    pub summarize: SummarizeConfig,
    pub expiry: ExpiryConfig,
    pub session: SessionConfig,
    pub search: SearchConfig,
    pub sharing: SharingConfig,
    pub undo: UndoConfig,
    pub audit: AuditConfig,
}

impl Config {
    /// `$XDG_CONFIG_HOME/memoria/config.toml` (or the platform equivalent),
    /// used by the binaries when `--config`/`MEMORIA_CONFIG` isn't given.
    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|dir| dir.join("memoria").join("config.toml"))
    }

    /// Load defaults, then a TOML file if present, then `MEMORIA_*` env overrides.
    ///
    /// `path` is tried first; if it's `None`, [`Self::default_path`] is tried
    /// next and silently skipped if it doesn't exist (there being no config
    /// file there is normal, not an error).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        let resolved = path.map(|p| p.to_path_buf()).or_else(|| {
            let default_path = Self::default_path()?;
            default_path.is_file().then_some(default_path)
        });

        if let Some(path) = resolved {
            let contents = std::fs::read_to_string(&path)?;
            config = toml::from_str(&contents)
                .map_err(|e| MemoriaError::Config(format!("invalid config file: {}", e)))?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MEMORIA_STORAGE_DATA_DIR") {
            self.storage.data_dir = v;
        }
        if let Ok(v) = std::env::var("MEMORIA_SERVER_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Ok(v) = std::env::var("MEMORIA_EMBEDDING_PROVIDER_ENDPOINT") {
            self.embedding.provider_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("MEMORIA_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("MEMORIA_DEDUP_THRESHOLD") {
            if let Ok(parsed) = v.parse() {
                self.dedup.threshold = parsed;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.dedup.threshold) {
            return Err(MemoriaError::Config(
                "dedup.threshold must be in [0.0, 1.0]".into(),
            ));
        }
        let weights = &self.search.weights;
        let sum = weights.semantic + weights.lexical + weights.recency;
        if (sum - 1.0).abs() > 0.01 {
            return Err(MemoriaError::Config(format!(
                "search.weights must sum to ~1.0, got {}",
                sum
            )));
        }
        if self.embedding.dimensions == 0 {
            return Err(MemoriaError::Config(
                "embedding.dimensions must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
