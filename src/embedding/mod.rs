//! Embedding provider implementations.
//!
//! Concrete [`Embedder`]s selected by `[embedding].provider`:
//! - **[`DisabledProvider`]**: fails every call; ingestion reports failure.
//! - **[`OpenAIProvider`]**: any OpenAI-compatible `/embeddings` endpoint, with batching, retry, and backoff.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: fastembed (all-MiniLM-L6-v2 by default); the model
//!   is loaded on first use and reused for the life of the process.
//!
//! # Retry Strategy
//!
//! The HTTP providers retry transient failures with exponential backoff:
//! - HTTP 429 and 5xx, timeouts, network errors → retry
//! - Other HTTP 4xx → fail immediately
//! - Backoff: 1s, 2s, 4s, … (capped at 32s)

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use surgisense_core::embedding::validate_embeddings;
use surgisense_core::error::{ConfigurationError, UpstreamError};
use tracing::{debug, warn};

pub use surgisense_core::embedding::Embedder;

use crate::config::{read_api_key, EmbeddingConfig};
use crate::upstream::{backoff_delay, build_client, map_transport_error, read_json};

const OPERATION: &str = "embedding";

/// Default local model and its dimensionality.
pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

// ============ Disabled Provider ============

/// A provider that always fails.
///
/// Used when `embedding.provider = "disabled"`; the server still serves the
/// extraction endpoints but document Q&A reports that no document is ready.
pub struct DisabledProvider;

#[async_trait]
impl Embedder for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
        Err(UpstreamError::Disabled {
            operation: OPERATION,
        })
    }
}

// ============ OpenAI-compatible Provider ============

/// Embedding provider for OpenAI-compatible `POST {url}/embeddings` APIs.
///
/// The API key is read from the variable named by `embedding.api_key_env`
/// (default `OPENAI_API_KEY`) at construction time.
pub struct OpenAIProvider {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ConfigurationError> {
        let model = config.model.clone().ok_or_else(|| {
            ConfigurationError::Invalid("embedding.model required for OpenAI provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            ConfigurationError::Invalid("embedding.dims required for OpenAI provider".to_string())
        })?;
        let api_key = read_api_key(&config.api_key_env)?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let result = match self
                .client
                .post(format!("{}/embeddings", self.url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => read_json(OPERATION, self.timeout_secs, response).await,
                Err(e) => Err(map_transport_error(OPERATION, self.timeout_secs, e)),
            };

            match result {
                Ok(json) => return parse_openai_response(&json),
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "embedding request failed, retrying");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(UpstreamError::Transport {
            operation: OPERATION,
            message: "embedding failed after retries".to_string(),
        }))
    }
}

#[async_trait]
impl Embedder for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(batch = batch.len(), "embedding batch");
            out.extend(self.embed_batch(batch).await?);
        }
        validate_embeddings(&out, texts.len(), self.dims)?;
        Ok(out)
    }
}

/// Parse `data[].embedding`, ordering by each item's `index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, UpstreamError> {
    let invalid = |message: &str| UpstreamError::InvalidResponse {
        operation: OPERATION,
        message: message.to_string(),
    };

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let vector = parse_vector(item.get("embedding")).ok_or_else(|| invalid("missing embedding"))?;
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_vector(value: Option<&serde_json::Value>) -> Option<Vec<f32>> {
    value?
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
/// Requires an embedding model to be pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    client: Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ConfigurationError> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "nomic-embed-text".to_string());
        let dims = config.dims.unwrap_or(768);
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Embedder for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let result = match self
                .client
                .post(format!("{}/api/embed", self.url))
                .json(&body)
                .send()
                .await
            {
                Ok(response) => read_json(OPERATION, self.timeout_secs, response).await,
                Err(e) => Err(map_transport_error(OPERATION, self.timeout_secs, e)),
            };

            match result {
                Ok(json) => {
                    let vectors = parse_ollama_response(&json)?;
                    validate_embeddings(&vectors, texts.len(), self.dims)?;
                    return Ok(vectors);
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, url = %self.url, error = %e, "ollama embedding failed, retrying");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(UpstreamError::Transport {
            operation: OPERATION,
            message: "ollama embedding failed after retries".to_string(),
        }))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, UpstreamError> {
    let invalid = |message: &str| UpstreamError::InvalidResponse {
        operation: OPERATION,
        message: message.to_string(),
    };

    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| invalid("missing embeddings array"))?
        .iter()
        .map(|e| parse_vector(Some(e)).ok_or_else(|| invalid("embedding is not a number array")))
        .collect()
}

// ============ Local Provider (fastembed) ============

/// Embedding provider running a sentence-transformer locally via fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached; the
/// loaded weights are kept behind a mutex and reused by every later call.
/// Inference runs on the blocking thread pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    timeout_secs: u64,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ConfigurationError> {
        let (model_name, dims) = resolve_local_model(config);
        config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size.max(1),
            timeout_secs: config.timeout_secs,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
        let model = Arc::clone(&self.model);
        let model_name = self.model_name.clone();
        let batch_size = self.batch_size;
        let owned = texts.to_vec();

        let task = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>, UpstreamError> {
            let failed = |message: String| UpstreamError::InvalidResponse {
                operation: OPERATION,
                message,
            };
            let mut guard = model
                .lock()
                .map_err(|_| failed("local embedding model lock poisoned".to_string()))?;
            if guard.is_none() {
                let fastembed_model = config_to_fastembed_model(&model_name)
                    .map_err(|e| failed(e.to_string()))?;
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
                )
                .map_err(|e| failed(format!("failed to initialize local embedding model: {}", e)))?;
                tracing::info!(model = %model_name, "local embedding model loaded");
                *guard = Some(loaded);
            }
            let embedder = guard
                .as_mut()
                .ok_or_else(|| failed("local embedding model unavailable".to_string()))?;
            embedder
                .embed(owned, Some(batch_size))
                .map_err(|e| failed(format!("local embedding failed: {}", e)))
        });

        let vectors = match tokio::time::timeout(
            std::time::Duration::from_secs(self.timeout_secs),
            task,
        )
        .await
        {
            Ok(joined) => joined.map_err(|e| UpstreamError::Transport {
                operation: OPERATION,
                message: format!("embedding task failed: {}", e),
            })??,
            Err(_) => {
                return Err(UpstreamError::Timeout {
                    operation: OPERATION,
                    timeout_secs: self.timeout_secs,
                })
            }
        };

        validate_embeddings(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel, ConfigurationError> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        other => Err(ConfigurationError::Invalid(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ))),
    }
}

/// Create the [`Embedder`] selected by configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires the `local-embeddings-fastembed` feature) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, ConfigurationError> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(ConfigurationError::Invalid(
            "Local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(ConfigurationError::UnknownProvider {
            kind: "embedding",
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        let err = parse_openai_response(&serde_json::json!({"error": "x"})).unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidResponse { .. }));
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.25], [1.0, 2.0]]});
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![1.0, 2.0]);

        let bad = serde_json::json!({"embeddings": [["a"]]});
        assert!(parse_ollama_response(&bad).is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_fails() {
        let provider = create_embedder(&EmbeddingConfig {
            provider: "disabled".to_string(),
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert_eq!(provider.model_name(), "disabled");
        let err = provider.embed_one("question").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Disabled { .. }));
    }

    #[test]
    fn test_unknown_provider() {
        let result = create_embedder(&EmbeddingConfig {
            provider: "magic".to_string(),
            ..EmbeddingConfig::default()
        });
        assert!(matches!(
            result,
            Err(ConfigurationError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn test_openai_requires_api_key() {
        let result = OpenAIProvider::new(&EmbeddingConfig {
            provider: "openai".to_string(),
            model: Some("text-embedding-3-small".to_string()),
            dims: Some(1536),
            api_key_env: "SURGISENSE_TEST_EMBED_KEY_NOT_SET".to_string(),
            ..EmbeddingConfig::default()
        });
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_ollama_unreachable_is_upstream_error() {
        let provider = OllamaProvider::new(&EmbeddingConfig {
            provider: "ollama".to_string(),
            url: Some("http://127.0.0.1:9".to_string()),
            max_retries: 0,
            timeout_secs: 2,
            ..EmbeddingConfig::default()
        })
        .unwrap();
        let err = provider.embed(&["text".to_string()]).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
