//! # Resolvd Config
//!
//! Configuration system for the resolvd support-ticket automation core.
//!
//! Provides TOML-based configuration parsing and validation for the
//! chunking, embedding, retrieval, and ticket-pipeline layers.
//!
//! # Configuration Schema
//!
//! The configuration file (`resolvd.toml`) supports the following sections:
//! - `[chunking]` — chunk size and overlap for document splitting
//! - `[embedding]` — vector dimensionality, similarity metric, query cache
//! - `[retrieval]` — top-k, thresholds, attempt ceiling, hybrid fusion weights
//! - `[pipeline]` — relaxation policy, latency budget, triage heuristics
//!
//! # Environment Variable Overrides
//!
//! Config fields can be overridden via environment variables using the
//! `RESOLVD_` prefix and `_` as section separator:
//! - `RESOLVD_CHUNKING_CHUNK_SIZE` → `chunking.chunk_size`
//! - `RESOLVD_RETRIEVAL_TOP_K` → `retrieval.top_k`
//! - `RESOLVD_RETRIEVAL_SCORE_THRESHOLD` → `retrieval.score_threshold`
//! - etc.
//!
//! Validation happens once at startup via [`ResolvdConfig::validate`];
//! per-ticket runtime code can assume every field is in range.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level resolvd configuration.
///
/// Parsed from `resolvd.toml` or constructed programmatically. Environment
/// variables with the `RESOLVD_` prefix override TOML values. The value is
/// immutable after construction: engines and processors receive it (or
/// sections of it) at construction time, so concurrent tickets with
/// different experiment configurations can run side by side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvdConfig {
    /// Document chunking settings.
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Embedding and query-cache settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Retrieval engine tuning.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Ticket pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Document chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in characters (default: 1200).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap between consecutive chunks of a section, in characters
    /// (default: 200). Must be smaller than `chunk_size`.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1200
}
fn default_chunk_overlap() -> usize {
    200
}

/// Embedding and query-cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding vector dimensionality (default: 384).
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Similarity metric. Only "cosine" is supported (default: "cosine").
    #[serde(default = "default_metric")]
    pub similarity_metric: String,
    /// Query-embedding cache capacity in entries (default: 1024).
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Maximum age of a cache entry in seconds before it is treated as a
    /// miss and recomputed. 0 disables age-based eviction (default: 0).
    #[serde(default)]
    pub cache_max_age_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            similarity_metric: default_metric(),
            cache_capacity: default_cache_capacity(),
            cache_max_age_secs: 0,
        }
    }
}

fn default_dimension() -> usize {
    384
}
fn default_metric() -> String {
    "cosine".to_string()
}
fn default_cache_capacity() -> usize {
    1024
}

/// Retrieval engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of results returned to the orchestrator (default: 5).
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum fused score for a result to be returned, on the [0, 1]
    /// similarity scale (default: 0.40).
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    /// Minimum mean fused score at which a result set is trusted enough to
    /// auto-resolve (default: 0.70).
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Retrieval attempt ceiling per ticket lifetime (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Over-fetch multiplier applied to `top_k` before filtering
    /// (default: 3).
    #[serde(default = "default_over_fetch_factor")]
    pub over_fetch_factor: usize,
    /// Weight of the semantic (vector) score in hybrid fusion
    /// (default: 0.7). Must sum to 1 with `lexical_weight`.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    /// Weight of the lexical (keyword) score in hybrid fusion
    /// (default: 0.3).
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,
    /// Whether to combine lexical keyword scoring with vector search
    /// (default: true).
    #[serde(default = "default_use_hybrid")]
    pub use_hybrid: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            confidence_threshold: default_confidence_threshold(),
            max_attempts: default_max_attempts(),
            over_fetch_factor: default_over_fetch_factor(),
            semantic_weight: default_semantic_weight(),
            lexical_weight: default_lexical_weight(),
            use_hybrid: default_use_hybrid(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_score_threshold() -> f32 {
    0.40
}
fn default_confidence_threshold() -> f32 {
    0.70
}
fn default_max_attempts() -> u32 {
    3
}
fn default_over_fetch_factor() -> usize {
    3
}
fn default_semantic_weight() -> f32 {
    0.7
}
fn default_lexical_weight() -> f32 {
    0.3
}
fn default_use_hybrid() -> bool {
    true
}

/// Ticket pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Multiplicative score-threshold relaxation per retry attempt, in
    /// (0, 1) (default: 0.75). Attempt n uses
    /// `score_threshold * relaxation_factor^(n-1)`.
    #[serde(default = "default_relaxation_factor")]
    pub relaxation_factor: f32,
    /// Latency budget per retrieval call in milliseconds; exceeding it is
    /// treated as a failed attempt (default: 5000).
    #[serde(default = "default_latency_budget_ms")]
    pub latency_budget_ms: u64,
    /// Maximum number of keywords extracted from a ticket (default: 8).
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
    /// Terms that mark a ticket as urgent during the scoring stage.
    #[serde(default = "default_urgency_keywords")]
    pub urgency_keywords: Vec<String>,
    /// Category name → trigger keywords, used by the classification stage.
    /// Category names are matched against chunk section paths at retrieval
    /// time, so they should mirror the knowledge base's top-level sections.
    #[serde(default)]
    pub categories: HashMap<String, Vec<String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            relaxation_factor: default_relaxation_factor(),
            latency_budget_ms: default_latency_budget_ms(),
            max_keywords: default_max_keywords(),
            urgency_keywords: default_urgency_keywords(),
            categories: HashMap::new(),
        }
    }
}

fn default_relaxation_factor() -> f32 {
    0.75
}
fn default_latency_budget_ms() -> u64 {
    5000
}
fn default_max_keywords() -> usize {
    8
}
fn default_urgency_keywords() -> Vec<String> {
    ["urgent", "critical", "outage", "down", "broken", "immediately"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl ResolvdConfig {
    /// Load configuration from a TOML file, then apply environment
    /// variable overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string, then apply environment
    /// variable overrides.
    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        let mut config: ResolvdConfig = toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Variables use the `RESOLVD_` prefix with `_` as section separator:
    /// - `RESOLVD_CHUNKING_CHUNK_SIZE` → `chunking.chunk_size`
    /// - `RESOLVD_CHUNKING_CHUNK_OVERLAP` → `chunking.chunk_overlap`
    /// - `RESOLVD_EMBEDDING_DIMENSION` → `embedding.dimension`
    /// - `RESOLVD_EMBEDDING_CACHE_CAPACITY` → `embedding.cache_capacity`
    /// - `RESOLVD_RETRIEVAL_TOP_K` → `retrieval.top_k`
    /// - `RESOLVD_RETRIEVAL_SCORE_THRESHOLD` → `retrieval.score_threshold`
    /// - `RESOLVD_RETRIEVAL_CONFIDENCE_THRESHOLD` → `retrieval.confidence_threshold`
    /// - `RESOLVD_RETRIEVAL_MAX_ATTEMPTS` → `retrieval.max_attempts`
    /// - `RESOLVD_RETRIEVAL_USE_HYBRID` → `retrieval.use_hybrid`
    /// - `RESOLVD_PIPELINE_LATENCY_BUDGET_MS` → `pipeline.latency_budget_ms`
    /// - `RESOLVD_PIPELINE_RELAXATION_FACTOR` → `pipeline.relaxation_factor`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RESOLVD_CHUNKING_CHUNK_SIZE") {
            if let Ok(n) = v.parse::<usize>() {
                self.chunking.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("RESOLVD_CHUNKING_CHUNK_OVERLAP") {
            if let Ok(n) = v.parse::<usize>() {
                self.chunking.chunk_overlap = n;
            }
        }
        if let Ok(v) = std::env::var("RESOLVD_EMBEDDING_DIMENSION") {
            if let Ok(n) = v.parse::<usize>() {
                self.embedding.dimension = n;
            }
        }
        if let Ok(v) = std::env::var("RESOLVD_EMBEDDING_CACHE_CAPACITY") {
            if let Ok(n) = v.parse::<usize>() {
                self.embedding.cache_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("RESOLVD_RETRIEVAL_TOP_K") {
            if let Ok(n) = v.parse::<usize>() {
                self.retrieval.top_k = n;
            }
        }
        if let Ok(v) = std::env::var("RESOLVD_RETRIEVAL_SCORE_THRESHOLD") {
            if let Ok(n) = v.parse::<f32>() {
                self.retrieval.score_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("RESOLVD_RETRIEVAL_CONFIDENCE_THRESHOLD") {
            if let Ok(n) = v.parse::<f32>() {
                self.retrieval.confidence_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("RESOLVD_RETRIEVAL_MAX_ATTEMPTS") {
            if let Ok(n) = v.parse::<u32>() {
                self.retrieval.max_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("RESOLVD_RETRIEVAL_USE_HYBRID") {
            if let Ok(b) = v.parse::<bool>() {
                self.retrieval.use_hybrid = b;
            }
        }
        if let Ok(v) = std::env::var("RESOLVD_PIPELINE_LATENCY_BUDGET_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.pipeline.latency_budget_ms = n;
            }
        }
        if let Ok(v) = std::env::var("RESOLVD_PIPELINE_RELAXATION_FACTOR") {
            if let Ok(n) = v.parse::<f32>() {
                self.pipeline.relaxation_factor = n;
            }
        }
    }

    /// Validate the configuration, failing fast on out-of-range values.
    ///
    /// Called once at startup so that per-ticket runtime code never has to
    /// re-check ranges.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be > 0.");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({}).",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.embedding.dimension == 0 {
            anyhow::bail!("embedding.dimension must be > 0.");
        }
        if self.embedding.similarity_metric != "cosine" {
            anyhow::bail!(
                "embedding.similarity_metric must be 'cosine', got '{}'.",
                self.embedding.similarity_metric
            );
        }
        if self.embedding.cache_capacity == 0 {
            anyhow::bail!("embedding.cache_capacity must be > 0.");
        }
        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be > 0.");
        }
        if !(0.0..=1.0).contains(&self.retrieval.score_threshold) {
            anyhow::bail!(
                "retrieval.score_threshold must be within [0, 1], got {}.",
                self.retrieval.score_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.retrieval.confidence_threshold) {
            anyhow::bail!(
                "retrieval.confidence_threshold must be within [0, 1], got {}.",
                self.retrieval.confidence_threshold
            );
        }
        if self.retrieval.max_attempts == 0 {
            anyhow::bail!("retrieval.max_attempts must be > 0.");
        }
        if self.retrieval.over_fetch_factor == 0 {
            anyhow::bail!("retrieval.over_fetch_factor must be > 0.");
        }
        let weight_sum = self.retrieval.semantic_weight + self.retrieval.lexical_weight;
        if !(0.0..=1.0).contains(&self.retrieval.semantic_weight)
            || !(0.0..=1.0).contains(&self.retrieval.lexical_weight)
            || (weight_sum - 1.0).abs() > 1e-3
        {
            anyhow::bail!(
                "retrieval.semantic_weight ({}) and retrieval.lexical_weight ({}) must each be in [0, 1] and sum to 1.",
                self.retrieval.semantic_weight,
                self.retrieval.lexical_weight
            );
        }
        if self.pipeline.relaxation_factor <= 0.0 || self.pipeline.relaxation_factor >= 1.0 {
            anyhow::bail!(
                "pipeline.relaxation_factor must be within (0, 1), got {}.",
                self.pipeline.relaxation_factor
            );
        }
        if self.pipeline.latency_budget_ms == 0 {
            anyhow::bail!("pipeline.latency_budget_ms must be > 0.");
        }
        if self.pipeline.max_keywords == 0 {
            anyhow::bail!("pipeline.max_keywords must be > 0.");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ResolvdConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.max_attempts, 3);
        assert!((config.retrieval.score_threshold - 0.40).abs() < 1e-6);
        assert!((config.retrieval.confidence_threshold - 0.70).abs() < 1e-6);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = ResolvdConfig::parse_toml(
            r#"
            [retrieval]
            top_k = 8
            score_threshold = 0.5

            [pipeline.categories]
            billing = ["invoice", "refund"]
            "#,
        )
        .unwrap();
        assert_eq!(config.retrieval.top_k, 8);
        assert!((config.retrieval.score_threshold - 0.5).abs() < 1e-6);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.retrieval.max_attempts, 3);
        assert_eq!(config.chunking.chunk_size, 1200);
        assert_eq!(config.pipeline.categories["billing"].len(), 2);
    }

    #[test]
    fn rejects_zero_top_k() {
        let mut config = ResolvdConfig::default();
        config.retrieval.top_k = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("top_k"), "unexpected error: {err}");
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = ResolvdConfig::default();
        config.retrieval.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let mut config = ResolvdConfig::default();
        config.chunking.chunk_size = 100;
        config.chunking.chunk_overlap = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let mut config = ResolvdConfig::default();
        config.retrieval.semantic_weight = 0.9;
        config.retrieval.lexical_weight = 0.3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_relaxation_factor_of_one() {
        let mut config = ResolvdConfig::default();
        config.pipeline.relaxation_factor = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_similarity_metric() {
        let mut config = ResolvdConfig::default();
        config.embedding.similarity_metric = "euclidean".into();
        assert!(config.validate().is_err());
    }
}
