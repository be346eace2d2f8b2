//! Embedding provider trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that every embedding backend implements.
//! Concrete providers (OpenAI-compatible, Ollama, fastembed) live in the
//! `surgisense` application crate; tests use small deterministic stubs.

use async_trait::async_trait;

use crate::error::UpstreamError;

/// Maps text to fixed-dimension dense vectors.
///
/// Document chunks and questions must be embedded by the same instance so
/// that both live in one metric space.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError>;

    /// Embed a single text (e.g. a question) with the same model.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, UpstreamError> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(UpstreamError::InvalidResponse {
                operation: "embedding",
                message: "empty embedding response".to_string(),
            })
    }
}

/// Check that a provider returned one vector of `dims` floats per input.
pub fn validate_embeddings(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dims: usize,
) -> Result<(), UpstreamError> {
    if vectors.len() != expected_count {
        return Err(UpstreamError::InvalidResponse {
            operation: "embedding",
            message: format!(
                "expected {} vectors, received {}",
                expected_count,
                vectors.len()
            ),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(UpstreamError::InvalidResponse {
            operation: "embedding",
            message: format!("expected {} dimensions, received {}", dims, bad.len()),
        });
    }
    Ok(())
}

/// Squared Euclidean distance between two vectors of equal length.
///
/// ```text
/// d²(a, b) = Σ (aᵢ - bᵢ)²
/// ```
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squared_l2_identical() {
        let v = vec![0.5, -1.0, 2.0];
        assert_eq!(squared_l2(&v, &v), 0.0);
    }

    #[test]
    fn test_squared_l2_known_value() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        assert!((squared_l2(&a, &b) - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_embeddings() {
        let ok = vec![vec![0.0; 4], vec![1.0; 4]];
        assert!(validate_embeddings(&ok, 2, 4).is_ok());

        let err = validate_embeddings(&ok, 3, 4).unwrap_err();
        assert!(err.to_string().contains("expected 3 vectors"));

        let ragged = vec![vec![0.0; 4], vec![1.0; 3]];
        let err = validate_embeddings(&ragged, 2, 4).unwrap_err();
        assert!(err.to_string().contains("expected 4 dimensions"));
    }
}
