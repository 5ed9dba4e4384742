//! TOML configuration parsing and validation.
//!
//! Every section is optional; an empty file yields a working configuration
//! that talks to a local Ollama and keeps state in SQLite under `./data`.
//! [`load_config`] parses and validates; [`Config::settings`] converts the
//! file into typed runtime [`PipelineSettings`].

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use context_chat_core::retrieval::RetrievalParams;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/ctxchat.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default)]
    pub keyword_filter: bool,
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            candidate_multiplier: default_candidate_multiplier(),
            keyword_filter: false,
            backend: default_backend(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_similarity_threshold() -> f64 {
    0.3
}
fn default_candidate_multiplier() -> usize {
    2
}
fn default_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            history_limit: default_history_limit(),
            backend: default_backend(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}
fn default_history_limit() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_understanding_secs")]
    pub understanding_secs: u64,
    #[serde(default = "default_retrieval_secs")]
    pub retrieval_secs: u64,
    #[serde(default = "default_generation_secs")]
    pub generation_secs: u64,
    #[serde(default = "default_session_secs")]
    pub session_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            understanding_secs: default_understanding_secs(),
            retrieval_secs: default_retrieval_secs(),
            generation_secs: default_generation_secs(),
            session_secs: default_session_secs(),
        }
    }
}

fn default_understanding_secs() -> u64 {
    15
}
fn default_retrieval_secs() -> u64 {
    10
}
fn default_generation_secs() -> u64 {
    120
}
fn default_session_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_true")]
    pub expansion: bool,
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            expansion: true,
            max_keywords: default_max_keywords(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_keywords() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default = "default_true")]
    pub reasoning: bool,
    #[serde(default)]
    pub strict_citations: bool,
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: default_max_prompt_chars(),
            reasoning: true,
            strict_citations: false,
            stream_buffer: default_stream_buffer(),
        }
    }
}

fn default_max_prompt_chars() -> usize {
    16_000
}
fn default_stream_buffer() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for Ollama (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
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

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key (OpenAI-compatible only).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "llama3".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

/// Typed runtime settings consumed by the pipeline stages.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub retrieval: RetrievalParams,
    pub history_limit: usize,
    pub understanding_timeout: Duration,
    pub retrieval_timeout: Duration,
    pub generation_timeout: Duration,
    pub session_timeout: Duration,
    pub query_expansion: bool,
    pub max_keywords: usize,
    pub max_prompt_chars: usize,
    pub reasoning: bool,
    pub strict_citations: bool,
    pub stream_buffer: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Config::default().settings()
    }
}

impl Config {
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            retrieval: RetrievalParams {
                top_k: self.retrieval.top_k,
                similarity_threshold: self.retrieval.similarity_threshold,
                candidate_multiplier: self.retrieval.candidate_multiplier,
                keyword_filter: self.retrieval.keyword_filter,
            },
            history_limit: self.session.history_limit,
            understanding_timeout: Duration::from_secs(self.timeouts.understanding_secs),
            retrieval_timeout: Duration::from_secs(self.timeouts.retrieval_secs),
            generation_timeout: Duration::from_secs(self.timeouts.generation_secs),
            session_timeout: Duration::from_secs(self.timeouts.session_secs),
            query_expansion: self.query.expansion,
            max_keywords: self.query.max_keywords,
            max_prompt_chars: self.generation.max_prompt_chars,
            reasoning: self.generation.reasoning,
            strict_citations: self.generation.strict_citations,
            stream_buffer: self.generation.stream_buffer,
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.ttl_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

pub fn validate(config: &Config) -> Result<()> {
    // Retrieval
    if config.retrieval.candidate_multiplier < 1 {
        bail!("retrieval.candidate_multiplier must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        bail!("retrieval.similarity_threshold must be in [-1.0, 1.0]");
    }
    match config.retrieval.backend.as_str() {
        "sqlite" | "memory" => {}
        other => bail!(
            "Unknown retrieval backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    // Session
    if config.session.ttl_secs == 0 {
        bail!("session.ttl_secs must be > 0");
    }
    match config.session.backend.as_str() {
        "sqlite" | "memory" => {}
        other => bail!(
            "Unknown session backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    // Timeouts
    let t = &config.timeouts;
    for (name, secs) in [
        ("understanding_secs", t.understanding_secs),
        ("retrieval_secs", t.retrieval_secs),
        ("generation_secs", t.generation_secs),
        ("session_secs", t.session_secs),
    ] {
        if secs == 0 {
            bail!("timeouts.{} must be > 0", name);
        }
    }

    // Query
    if config.query.max_keywords == 0 {
        bail!("query.max_keywords must be > 0");
    }

    // Generation
    if config.generation.max_prompt_chars == 0 {
        bail!("generation.max_prompt_chars must be > 0");
    }
    if config.generation.stream_buffer == 0 {
        bail!("generation.stream_buffer must be > 0");
    }

    // Embedding
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // Language model
    match config.llm.provider.as_str() {
        "ollama" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be ollama or openai.",
            other
        ),
    }

    Ok(())
}
