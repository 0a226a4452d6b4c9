//! Layered configuration loader and path helpers.
//!
//! Uses Figment to merge typed defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`__` separates nested keys, e.g. `APP_BM25__K1=1.5`).
//! `expand_path` handles `~` and `${VAR}` in configured paths.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::types::Metric;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Self {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_for_env(&env_name)
    }

    pub fn load_for_env(env_name: &str) -> Self {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default())).merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Self { figment }
    }

    /// Wrap an already-assembled figment (tests, embedding applications).
    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extract and validate the typed engine configuration.
    pub fn engine(&self) -> Result<EngineConfig> {
        let cfg: EngineConfig = self.figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Config {
    fn default() -> Self { Self { k1: 1.2, b: 0.75 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// RRF damping constant.
    pub kappa: f64,
    /// Fusion width M: candidates requested from each retriever and kept after fusion.
    pub width: usize,
    pub lexical_weight: f64,
    pub vector_weight: f64,
}

impl Default for FusionConfig {
    fn default() -> Self { Self { kappa: 60.0, width: 50, lexical_weight: 1.0, vector_weight: 1.0 } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankerBackend {
    Passthrough,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub backend: RerankerBackend,
    pub enabled: bool,
    pub timeout_ms: u64,
    /// Heuristic backend: preferred chunk length in characters.
    pub ideal_length: usize,
    pub length_weight: f32,
    pub keyword_weight: f32,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            backend: RerankerBackend::Passthrough,
            enabled: true,
            timeout_ms: 2_000,
            ideal_length: 500,
            length_weight: 0.2,
            keyword_weight: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub metric: Metric,
    /// Accepted recall loss for approximate search; exact search always meets it.
    pub recall_tolerance: f32,
    pub embed_timeout_ms: u64,
}

impl Default for VectorConfig {
    fn default() -> Self { Self { metric: Metric::Cosine, recall_tolerance: 0.0, embed_timeout_ms: 5_000 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CitationConfig {
    /// Maximum context size in characters (Unicode scalar values).
    pub context_budget: usize,
}

impl Default for CitationConfig {
    fn default() -> Self { Self { context_budget: 4_000 } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Hash,
    Candle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    pub dim: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Chunks per provider call during ingest and backfill.
    pub batch_size: usize,
    /// Maximum cached vectors (document and query texts); 0 disables the cache.
    pub cache_capacity: u64,
    pub model_dir: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Hash,
            dim: 384,
            max_retries: 2,
            retry_backoff_ms: 200,
            batch_size: 32,
            cache_capacity: 10_000,
            model_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_k: usize,
    pub max_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self { Self { default_k: 5, max_k: 50 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub snapshot_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self { Self { snapshot_path: "data/hybridrag.json".to_string() } }
}

impl StorageConfig {
    pub fn snapshot_path(&self) -> PathBuf { expand_path(&self.snapshot_path) }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bm25: Bm25Config,
    pub fusion: FusionConfig,
    pub reranker: RerankerConfig,
    pub vector: VectorConfig,
    pub citation: CitationConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub storage: StorageConfig,
}

fn invalid(msg: String) -> Error { Error::InvalidConfig(msg) }

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        let Bm25Config { k1, b } = self.bm25;
        if !(k1.is_finite() && k1 >= 0.0) {
            return Err(invalid(format!("bm25.k1 must be a non-negative number, got {k1}")));
        }
        if !(0.0..=1.0).contains(&b) {
            return Err(invalid(format!("bm25.b must be within [0, 1], got {b}")));
        }

        let f = &self.fusion;
        if !(f.kappa.is_finite() && f.kappa >= 0.0) {
            return Err(invalid(format!("fusion.kappa must be a non-negative number, got {}", f.kappa)));
        }
        if !(f.lexical_weight > 0.0 && f.vector_weight > 0.0) {
            return Err(invalid("fusion weights must be positive".into()));
        }
        if self.search.default_k == 0 || self.search.default_k > self.search.max_k {
            return Err(invalid(format!(
                "search.default_k must be within 1..={}, got {}",
                self.search.max_k, self.search.default_k
            )));
        }
        if f.width < self.search.max_k {
            return Err(invalid(format!(
                "fusion.width ({}) must be at least search.max_k ({})",
                f.width, self.search.max_k
            )));
        }

        let r = &self.reranker;
        if r.enabled && r.timeout_ms == 0 {
            return Err(invalid("reranker.timeout_ms must be positive".into()));
        }
        if r.length_weight < 0.0 || r.keyword_weight < 0.0 || r.length_weight + r.keyword_weight <= 0.0 {
            return Err(invalid("reranker weights must be non-negative and not both zero".into()));
        }
        if r.ideal_length == 0 {
            return Err(invalid("reranker.ideal_length must be positive".into()));
        }

        if !(0.0..=1.0).contains(&self.vector.recall_tolerance) {
            return Err(invalid(format!(
                "vector.recall_tolerance must be within [0, 1], got {}",
                self.vector.recall_tolerance
            )));
        }
        if self.vector.embed_timeout_ms == 0 {
            return Err(invalid("vector.embed_timeout_ms must be positive".into()));
        }
        if self.embedding.dim == 0 {
            return Err(invalid("embedding.dim must be positive".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(invalid("embedding.batch_size must be positive".into()));
        }
        if self.citation.context_budget == 0 {
            return Err(invalid("citation.context_budget must be positive".into()));
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
