use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CartographError;

/// Top-level configuration loaded from `.cartograph.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
///
/// # Examples
///
/// ```
/// use cartograph_core::CartographConfig;
///
/// let config = CartographConfig::default();
/// assert_eq!(config.build.max_files, 150);
/// assert_eq!(config.cache.capacity, 20);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CartographConfig {
    /// Graph construction limits.
    #[serde(default)]
    pub build: BuildConfig,
    /// Snapshot cache policy.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Search scoring constants.
    #[serde(default)]
    pub search: SearchConfig,
    /// Query agent limits.
    #[serde(default)]
    pub agent: AgentConfig,
    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// GitHub access settings.
    #[serde(default)]
    pub github: GitHubConfig,
}

impl CartographConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Io`] if the file cannot be read, or
    /// [`CartographError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cartograph_core::CartographConfig;
    /// use std::path::Path;
    ///
    /// let config = CartographConfig::from_file(Path::new(".cartograph.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, CartographError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Toml`] if parsing fails, or
    /// [`CartographError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use cartograph_core::CartographConfig;
    ///
    /// let toml = r#"
    /// [build]
    /// max_files = 400
    /// "#;
    /// let config = CartographConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.build.max_files, 400);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, CartographError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from environment variables (`GITHUB_TOKEN`, `OPENAI_API_KEY`)
    /// onto fields the file left empty.
    pub fn with_env(mut self) -> Self {
        if self.github.token.is_none() {
            self.github.token = std::env::var("GITHUB_TOKEN").ok();
        }
        if self.llm.api_key.is_none() {
            self.llm.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        self
    }

    fn validate(&self) -> Result<(), CartographError> {
        if self.build.concurrency == 0 {
            return Err(CartographError::Config(
                "build.concurrency must be at least 1".into(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(CartographError::Config(
                "cache.capacity must be at least 1".into(),
            ));
        }
        if self.agent.max_rounds == 0 {
            return Err(CartographError::Config(
                "agent.max_rounds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// How a call-site whose name matches several symbols across the graph is resolved.
///
/// # Examples
///
/// ```
/// use cartograph_core::AmbiguityPolicy;
///
/// assert_eq!(AmbiguityPolicy::default(), AmbiguityPolicy::FirstMatch);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Pick one candidate deterministically (lowest node id).
    #[default]
    FirstMatch,
    /// Emit one low-confidence edge per candidate.
    SplitAll,
}

/// Limits and filters applied while building a graph.
///
/// # Examples
///
/// ```
/// use cartograph_core::BuildConfig;
///
/// let config = BuildConfig::default();
/// assert_eq!(config.max_file_size, 50 * 1024);
/// assert_eq!(config.concurrency, 5);
/// assert!(config.noise_dirs.iter().any(|d| d == "node_modules"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Maximum number of source files considered (default: 150).
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Maximum size of a single file in bytes (default: 50 KB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Files fetched concurrently per batch (default: 5).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Directory names never descended into.
    #[serde(default = "default_noise_dirs")]
    pub noise_dirs: Vec<String>,
    /// Additional glob patterns to skip.
    #[serde(default)]
    pub skip_patterns: Vec<String>,
    /// Resolution policy for ambiguous global call matches.
    #[serde(default)]
    pub ambiguity: AmbiguityPolicy,
    /// Per-request timeout for repository calls, in seconds (default: 30).
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Retries for transient repository failures (default: 2).
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
}

fn default_max_files() -> usize {
    150
}

fn default_max_file_size() -> u64 {
    50 * 1024
}

fn default_concurrency() -> usize {
    5
}

fn default_noise_dirs() -> Vec<String> {
    [
        "node_modules",
        "dist",
        "build",
        ".git",
        ".next",
        "out",
        "coverage",
        "__pycache__",
        ".venv",
        "venv",
        "vendor",
        "target",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_fetch_retries() -> u32 {
    2
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_file_size: default_max_file_size(),
            concurrency: default_concurrency(),
            noise_dirs: default_noise_dirs(),
            skip_patterns: Vec::new(),
            ambiguity: AmbiguityPolicy::default(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fetch_retries: default_fetch_retries(),
        }
    }
}

/// Graph snapshot cache policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Seconds a built graph stays valid (default: 1800).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Maximum number of cached graphs (default: 20).
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_ttl_secs() -> u64 {
    30 * 60
}

fn default_capacity() -> usize {
    20
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            capacity: default_capacity(),
        }
    }
}

/// Search scoring constants.
///
/// # Examples
///
/// ```
/// use cartograph_core::SearchConfig;
///
/// let config = SearchConfig::default();
/// assert_eq!(config.bm25_k1, 1.2);
/// assert_eq!(config.bm25_b, 0.75);
/// assert_eq!(config.rrf_k, 60);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// BM25 term-frequency saturation (default: 1.2).
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    /// BM25 length normalization (default: 0.75).
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
    /// Reciprocal Rank Fusion constant (default: 60).
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
}

fn default_bm25_k1() -> f64 {
    1.2
}

fn default_bm25_b() -> f64 {
    0.75
}

fn default_rrf_k() -> usize {
    60
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
            rrf_k: default_rrf_k(),
        }
    }
}

/// Query agent limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model round-trips before synthesizing an answer (default: 5).
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Completion token cap per model call (default: 2048).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Timeout for a single model call, in seconds (default: 120).
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_rounds() -> usize {
    5
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_agent_timeout_secs() -> u64 {
    120
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

/// LLM provider configuration.
///
/// # Examples
///
/// ```
/// use cartograph_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model, "gpt-4o");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name (e.g. `"openai"`, `"ollama"`).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4o".into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
        }
    }
}

/// GitHub access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Personal access token.
    pub token: Option<String>,
    /// REST API base URL (default: `https://api.github.com`).
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_api_url() -> String {
    "https://api.github.com".into()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_api_url(),
        }
    }
}
