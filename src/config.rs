//! TOML configuration for `fdraft`.
//!
//! Every section except `[index]` may be omitted and falls back to the
//! defaults below. [`load_config`] parses and validates; nothing else in the
//! crate re-checks these invariants.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use facilities_core::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use facilities_core::retrieve::DEFAULT_OVERFETCH_FACTOR;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_persist_directory")]
    pub persist_directory: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_persist_directory() -> PathBuf {
    PathBuf::from("./chroma_db")
}
fn default_collection() -> String {
    "facilities".to_string()
}

impl IndexConfig {
    /// SQLite file backing the configured collection.
    pub fn db_path(&self) -> PathBuf {
        self.persist_directory
            .join(format!("{}.sqlite", self.collection))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

/// Which chunk attribute identifies an already-ingested file.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    /// File name only. Same-named files in different folders collide.
    #[default]
    Filename,
    RelativePath,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub dedup_key: DedupKey,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_pause_secs")]
    pub pause_secs: u64,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            include_globs: default_include_globs(),
            exclude_globs: default_exclude_globs(),
            dedup_key: DedupKey::default(),
            max_attempts: default_max_attempts(),
            cooldown_secs: default_cooldown_secs(),
            pause_secs: default_pause_secs(),
            follow_symlinks: false,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("./data")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string()]
}
fn default_exclude_globs() -> Vec<String> {
    vec!["**/.git/**".to_string()]
}
fn default_max_attempts() -> u32 {
    3
}
fn default_cooldown_secs() -> u64 {
    60
}
fn default_pause_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            overfetch_factor: default_overfetch_factor(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_overfetch_factor() -> usize {
    DEFAULT_OVERFETCH_FACTOR
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Endpoint base URL; provider-specific default when unset.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    /// Gateway routing identifier, sent as `x-portkey-virtual-key`.
    #[serde(default)]
    pub virtual_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            base_url: None,
            api_key_env: default_embedding_key_env(),
            virtual_key: None,
            timeout_secs: default_timeout_secs(),
            batch_size: default_batch_size(),
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
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub virtual_key: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_key_env(),
            virtual_key: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o".to_string()
}
fn default_llm_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}

/// How a search hit's URL is checked against `allowed_sites`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Host contains an allowed domain (`nyu.edu`).
    #[default]
    Domain,
    /// URL starts with an allowed prefix (`https://www.nyu.edu/research`).
    Prefix,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebSearchConfig {
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_search_base_url")]
    pub base_url: String,
    #[serde(default = "default_allowed_sites")]
    pub allowed_sites: Vec<String>,
    #[serde(default)]
    pub match_mode: MatchMode,
    #[serde(default = "default_blocklist")]
    pub blocklist: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            base_url: default_search_base_url(),
            allowed_sites: default_allowed_sites(),
            match_mode: MatchMode::default(),
            blocklist: default_blocklist(),
            max_results: default_max_results(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_search_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}
fn default_search_base_url() -> String {
    "https://api.tavily.com".to_string()
}
fn default_allowed_sites() -> Vec<String> {
    vec!["nyu.edu".to_string(), "nsf.gov".to_string()]
}
fn default_blocklist() -> Vec<String> {
    vec![
        "https://med.nyu.edu/research/scientific-cores-shared-resources/high-performance-computing-core"
            .to_string(),
    ]
}
fn default_max_results() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_queries")]
    pub queries: Vec<String>,
    #[serde(default = "default_num_runs")]
    pub num_runs: usize,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_category_filter")]
    pub category_filter: Vec<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            queries: default_queries(),
            num_runs: default_num_runs(),
            k: default_k(),
            category_filter: default_category_filter(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_queries() -> Vec<String> {
    [
        "computing resources and high-performance computing",
        "laboratory space and research facilities",
        "data storage and management infrastructure",
        "core instrumentation and equipment",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_num_runs() -> usize {
    5
}
fn default_category_filter() -> Vec<String> {
    vec!["NSF".to_string()]
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    // Ingest
    if config.ingest.max_attempts < 1 {
        anyhow::bail!("ingest.max_attempts must be >= 1");
    }

    // Retrieval
    if config.retrieval.k < 1 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if config.retrieval.overfetch_factor < 1 {
        anyhow::bail!("retrieval.overfetch_factor must be >= 1");
    }

    // Analysis
    if config.analysis.num_runs < 1 {
        anyhow::bail!("analysis.num_runs must be >= 1");
    }
    if config.analysis.k < 1 {
        anyhow::bail!("analysis.k must be >= 1");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(toml_src: &str) -> Result<Config> {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(toml_src.as_bytes()).unwrap();
        load_config(f.path())
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[index]\n").unwrap();
        assert_eq!(config.index.collection, "facilities");
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.ingest.max_attempts, 3);
        assert_eq!(config.ingest.cooldown_secs, 60);
        assert_eq!(config.ingest.pause_secs, 30);
        assert_eq!(config.ingest.dedup_key, DedupKey::Filename);
        assert_eq!(config.retrieval.k, 5);
        assert_eq!(config.retrieval.overfetch_factor, 3);
        assert_eq!(config.analysis.category_filter, vec!["NSF"]);
        assert_eq!(config.web_search.match_mode, MatchMode::Domain);
        assert_eq!(config.llm.model, "gpt-4o");
        assert!(!config.embedding.is_enabled());
        assert!(config.index.db_path().ends_with("facilities.sqlite"));
    }

    #[test]
    fn default_blocklist_drops_hpc_core_page() {
        let config = parse("[index]\n").unwrap();
        assert_eq!(config.web_search.blocklist.len(), 1);
        assert!(config.web_search.blocklist[0].contains("high-performance-computing-core"));

        let config = parse("[index]\n[web_search]\nblocklist = []\n").unwrap();
        assert!(config.web_search.blocklist.is_empty());
    }

    #[test]
    fn example_config_is_valid() {
        let config = parse(include_str!("../config/fdraft.example.toml")).unwrap();
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(
            config.web_search.blocklist,
            WebSearchConfig::default().blocklist
        );
    }

    #[test]
    fn enums_parse_snake_case() {
        let config = parse(
            "[index]\n[ingest]\ndedup_key = \"relative_path\"\n[web_search]\nmatch_mode = \"prefix\"\n",
        )
        .unwrap();
        assert_eq!(config.ingest.dedup_key, DedupKey::RelativePath);
        assert_eq!(config.web_search.match_mode, MatchMode::Prefix);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let err = parse("[index]\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn rejects_zero_attempts_and_k() {
        assert!(parse("[index]\n[ingest]\nmax_attempts = 0\n").is_err());
        assert!(parse("[index]\n[retrieval]\nk = 0\n").is_err());
        assert!(parse("[index]\n[analysis]\nnum_runs = 0\n").is_err());
    }

    #[test]
    fn rejects_unknown_modes() {
        assert!(parse("[index]\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[index]\n[ingest]\ndedup_key = \"inode\"\n").is_err());
    }

    #[test]
    fn enabled_provider_needs_model_and_dims() {
        let err = parse("[index]\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("dims"));
        let err = parse("[index]\n[embedding]\nprovider = \"openai\"\ndims = 8\n").unwrap_err();
        assert!(err.to_string().contains("model"));
        assert!(parse(
            "[index]\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n"
        )
        .is_ok());
    }
}
