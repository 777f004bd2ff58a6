use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::cluster::ClusteringStrategy;
use crate::conflict::{ConflictBudget, MAX_VALIDATION_TIMEOUT_S};
use crate::similarity::SimilarityMetric;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub nlp: NlpConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub conflicts: ConflictsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Location of the JSON document corpus served by the bundled retriever.
#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: default_corpus_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_corpus_root() -> PathBuf {
    PathBuf::from("./data/corpus")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Which backend answers the semantic similarity metric.
#[derive(Debug, Deserialize, Clone)]
pub struct NlpConfig {
    /// `"lexical"` (term-frequency cosine) or `"embedding"`.
    #[serde(default = "default_nlp_backend")]
    pub backend: String,
}

impl Default for NlpConfig {
    fn default() -> Self {
        Self {
            backend: default_nlp_backend(),
        }
    }
}

fn default_nlp_backend() -> String {
    "lexical".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimilarityConfig {
    /// Per-metric weight overrides, keyed by metric name.
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    /// Weight applied to metric keys without an explicit weight.
    #[serde(default = "default_unknown_weight")]
    pub default_weight: f64,
    /// Minimum combined score for a pair to be reported as related.
    #[serde(default = "default_relationship_threshold")]
    pub relationship_threshold: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            weights: HashMap::new(),
            default_weight: default_unknown_weight(),
            relationship_threshold: default_relationship_threshold(),
        }
    }
}

fn default_unknown_weight() -> f64 {
    0.1
}
fn default_relationship_threshold() -> f64 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusteringConfig {
    #[serde(default = "default_strategy")]
    pub default_strategy: String,
    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    /// Join threshold for the `mixed_features` strategy.
    #[serde(default = "default_cluster_threshold")]
    pub similarity_threshold: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            default_strategy: default_strategy(),
            max_clusters: default_max_clusters(),
            min_cluster_size: default_min_cluster_size(),
            similarity_threshold: default_cluster_threshold(),
        }
    }
}

fn default_strategy() -> String {
    "mixed_features".to_string()
}
fn default_max_clusters() -> usize {
    10
}
fn default_min_cluster_size() -> usize {
    2
}
fn default_cluster_threshold() -> f64 {
    0.3
}

/// Default conflict-detection budget; tool calls may override each field.
#[derive(Debug, Deserialize, Clone)]
pub struct ConflictsConfig {
    #[serde(default)]
    pub use_llm: bool,
    #[serde(default = "default_max_llm_pairs")]
    pub max_llm_pairs: usize,
    #[serde(default = "default_overall_timeout")]
    pub overall_timeout_s: f64,
    #[serde(default = "default_max_pairs_total")]
    pub max_pairs_total: usize,
    #[serde(default = "default_text_window")]
    pub text_window_chars: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            use_llm: false,
            max_llm_pairs: default_max_llm_pairs(),
            overall_timeout_s: default_overall_timeout(),
            max_pairs_total: default_max_pairs_total(),
            text_window_chars: default_text_window(),
            max_concurrency: default_max_concurrency(),
            min_text_length: default_min_text_length(),
        }
    }
}

impl ConflictsConfig {
    pub fn budget(&self) -> ConflictBudget {
        ConflictBudget {
            use_llm: self.use_llm,
            max_llm_pairs: self.max_llm_pairs,
            overall_timeout_s: self.overall_timeout_s,
            max_pairs_total: self.max_pairs_total,
            text_window_chars: self.text_window_chars,
            max_concurrency: self.max_concurrency,
        }
    }
}

fn default_max_llm_pairs() -> usize {
    5
}
fn default_overall_timeout() -> f64 {
    30.0
}
fn default_max_pairs_total() -> usize {
    50
}
fn default_text_window() -> usize {
    2000
}
fn default_max_concurrency() -> usize {
    4
}
fn default_min_text_length() -> usize {
    20
}

/// External model used to validate conflict candidates.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `"disabled"`, `"openai"`, or `"ollama"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_llm_retries(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_retries() -> u32 {
    2
}

impl Config {
    /// A config with every section defaulted, bound to `127.0.0.1:7332`.
    pub fn minimal() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:7332".to_string(),
            },
            corpus: CorpusConfig::default(),
            embedding: EmbeddingConfig::default(),
            nlp: NlpConfig::default(),
            similarity: SimilarityConfig::default(),
            clustering: ClusteringConfig::default(),
            conflicts: ConflictsConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    // Similarity
    for (name, weight) in &config.similarity.weights {
        if name.parse::<SimilarityMetric>().is_err() {
            anyhow::bail!("similarity.weights: unknown metric '{}'", name);
        }
        if !(0.0..=1.0).contains(weight) {
            anyhow::bail!("similarity.weights.{} must be in [0.0, 1.0]", name);
        }
    }
    if !(config.similarity.default_weight > 0.0 && config.similarity.default_weight <= 1.0) {
        anyhow::bail!("similarity.default_weight must be in (0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.similarity.relationship_threshold) {
        anyhow::bail!("similarity.relationship_threshold must be in [0.0, 1.0]");
    }

    // Clustering
    config
        .clustering
        .default_strategy
        .parse::<ClusteringStrategy>()
        .map_err(|e| anyhow::anyhow!("clustering.default_strategy: {}", e))?;
    if config.clustering.max_clusters == 0 {
        anyhow::bail!("clustering.max_clusters must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.clustering.similarity_threshold) {
        anyhow::bail!("clustering.similarity_threshold must be in [0.0, 1.0]");
    }

    // Conflicts
    if config.conflicts.overall_timeout_s <= 0.0 || !config.conflicts.overall_timeout_s.is_finite() {
        anyhow::bail!("conflicts.overall_timeout_s must be > 0");
    }
    if config.conflicts.overall_timeout_s > MAX_VALIDATION_TIMEOUT_S {
        anyhow::bail!("conflicts.overall_timeout_s must be <= {}", MAX_VALIDATION_TIMEOUT_S);
    }
    if config.conflicts.max_pairs_total == 0 {
        anyhow::bail!("conflicts.max_pairs_total must be >= 1");
    }
    if config.conflicts.text_window_chars == 0 {
        anyhow::bail!("conflicts.text_window_chars must be >= 1");
    }
    if config.conflicts.max_concurrency == 0 {
        anyhow::bail!("conflicts.max_concurrency must be >= 1");
    }

    // Backends
    match config.nlp.backend.as_str() {
        "lexical" => {}
        "embedding" => {
            if !config.embedding.is_enabled() {
                anyhow::bail!("nlp.backend = 'embedding' requires an [embedding] provider");
            }
        }
        other => anyhow::bail!(
            "Unknown nlp backend: '{}'. Must be lexical or embedding.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.llm.model.is_none() {
                anyhow::bail!(
                    "llm.model must be specified when provider is '{}'",
                    config.llm.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let content = format!("[server]\nbind = \"127.0.0.1:0\"\n{}", extra);
        let config: Config = toml::from_str(&content)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.nlp.backend, "lexical");
        assert_eq!(config.clustering.min_cluster_size, 2);
        assert_eq!(config.conflicts.max_pairs_total, 50);
        assert!(!config.llm.is_enabled());
    }

    #[test]
    fn test_rejects_unknown_weight_metric() {
        let err = parse("[similarity.weights]\nsentiment = 0.5\n").unwrap_err();
        assert!(err.to_string().contains("unknown metric"));
    }

    #[test]
    fn test_rejects_out_of_range_weight() {
        assert!(parse("[similarity.weights]\nentity_overlap = 1.5\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        assert!(parse("[clustering]\ndefault_strategy = \"kmeans\"\n").is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        assert!(parse("[conflicts]\noverall_timeout_s = 0.0\n").is_err());
    }

    #[test]
    fn test_rejects_unbounded_timeout() {
        assert!(parse("[conflicts]\noverall_timeout_s = 1e19\n").is_err());
        assert!(parse("[conflicts]\noverall_timeout_s = 3600.0\n").is_ok());
    }

    #[test]
    fn test_rejects_zero_default_weight() {
        let err = parse("[similarity]\ndefault_weight = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("default_weight"));
        assert!(parse("[similarity]\ndefault_weight = 0.05\n").is_ok());
    }

    #[test]
    fn test_llm_provider_requires_model() {
        assert!(parse("[llm]\nprovider = \"ollama\"\n").is_err());
        assert!(parse("[llm]\nprovider = \"ollama\"\nmodel = \"llama3\"\n").is_ok());
    }

    #[test]
    fn test_embedding_nlp_requires_provider() {
        assert!(parse("[nlp]\nbackend = \"embedding\"\n").is_err());
    }

    #[test]
    fn test_budget_from_config() {
        let config = parse("[conflicts]\nuse_llm = true\nmax_llm_pairs = 3\n").unwrap();
        let budget = config.conflicts.budget();
        assert!(budget.use_llm);
        assert_eq!(budget.max_llm_pairs, 3);
        assert_eq!(budget.text_window_chars, 2000);
    }
}
