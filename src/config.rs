//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a working configuration pointing at the hosted Groq and
//! Sarvam APIs with local embeddings. Secrets are never stored in the
//! file: each provider section names the environment variable holding its
//! API key, and `.env` is loaded before those variables are read.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8000"
//! allowed_origins = ["http://localhost:3000"]
//!
//! [chunking]
//! size = 800
//! overlap = 100
//!
//! [retrieval]
//! top_k = 3
//!
//! [embedding]
//! provider = "local"            # local | openai | ollama | disabled
//! model = "all-minilm-l6-v2"
//!
//! [llm]
//! base_url = "https://api.groq.com/openai/v1"
//! api_key_env = "GROQ_API_KEY"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use surgisense_core::chunk::{ChunkingParams, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use surgisense_core::error::ConfigurationError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: default_allowed_origins(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}
fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> Result<ChunkingParams, ConfigurationError> {
        ChunkingParams::new(self.size, self.overlap)
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `openai` and `ollama` providers.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
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
            api_key_env: default_embedding_key_env(),
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
    "local".to_string()
}
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

/// OpenAI-compatible chat-completions endpoint (Groq by default).
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    /// Model answering document questions.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Model used by `/api/scan` structured extraction.
    #[serde(default = "default_extraction_model")]
    pub extraction_model: String,
    /// Model used by `/api/digitize-record`.
    #[serde(default = "default_chat_model")]
    pub record_model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_env: default_llm_key_env(),
            chat_model: default_chat_model(),
            extraction_model: default_extraction_model(),
            record_model: default_chat_model(),
            vision_model: default_vision_model(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_llm_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_chat_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_extraction_model() -> String {
    "openai/gpt-oss-120b".to_string()
}
fn default_vision_model() -> String {
    "meta-llama/llama-4-scout-17b-16e-instruct".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

/// Sarvam speech-to-text endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct SpeechConfig {
    #[serde(default = "default_speech_url")]
    pub url: String,
    #[serde(default = "default_speech_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_speech_model")]
    pub model: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
    #[serde(default = "default_speech_mode")]
    pub mode: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            url: default_speech_url(),
            api_key_env: default_speech_key_env(),
            model: default_speech_model(),
            language_code: default_language_code(),
            mode: default_speech_mode(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_speech_url() -> String {
    "https://api.sarvam.ai/speech-to-text".to_string()
}
fn default_speech_key_env() -> String {
    "SARVAM_API_KEY".to_string()
}
fn default_speech_model() -> String {
    "saaras:v3".to_string()
}
fn default_language_code() -> String {
    "unknown".to_string()
}
fn default_speech_mode() -> String {
    "codemix".to_string()
}

/// Read the API key from the environment variable named by `env_name`.
pub fn read_api_key(env_name: &str) -> Result<String, ConfigurationError> {
    match std::env::var(env_name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigurationError::MissingCredential(env_name.to_string())),
    }
}

impl Config {
    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.chunking.params()?;

        if self.retrieval.top_k == 0 {
            return Err(ConfigurationError::Invalid(
                "retrieval.top_k must be >= 1".to_string(),
            ));
        }

        match self.embedding.provider.as_str() {
            "disabled" | "local" | "ollama" => {}
            "openai" => {
                if self.embedding.model.is_none() {
                    return Err(ConfigurationError::Invalid(
                        "embedding.model must be specified when provider is 'openai'".to_string(),
                    ));
                }
                if matches!(self.embedding.dims, None | Some(0)) {
                    return Err(ConfigurationError::Invalid(
                        "embedding.dims must be > 0 when provider is 'openai'".to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigurationError::UnknownProvider {
                    kind: "embedding",
                    name: other.to_string(),
                })
            }
        }
        if self.embedding.dims == Some(0) {
            return Err(ConfigurationError::Invalid(
                "embedding.dims must be > 0".to_string(),
            ));
        }

        for (name, secs) in [
            ("embedding.timeout_secs", self.embedding.timeout_secs),
            ("llm.timeout_secs", self.llm.timeout_secs),
            ("speech.timeout_secs", self.speech.timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigurationError::Invalid(format!("{} must be > 0", name)));
            }
        }

        if self.server.max_upload_bytes == 0 {
            return Err(ConfigurationError::Invalid(
                "server.max_upload_bytes must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse and validate a configuration string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Like [`load_config`], but falls back to defaults when `path` does not exist.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }
}
