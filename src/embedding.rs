//! Embedding providers backing the semantic similarity metric.
//!
//! An [`EmbeddingClient`] wraps the configured provider:
//! - **`disabled`**: every call fails; the semantic metric then degrades to `0.0`.
//! - **`openai`**: `POST /v1/embeddings`, requires `OPENAI_API_KEY`.
//! - **`ollama`**: `POST /api/embed` on a local Ollama instance.
//! - **`local`**: fastembed, behind the `local-embeddings-fastembed` feature.
//!
//! Retries follow [`crate::http::post_json_with_retry`].

use anyhow::{bail, Result};

use crate::config::EmbeddingConfig;
use crate::http;

/// Embedding provider bound to one configuration.
pub struct EmbeddingClient {
    config: EmbeddingConfig,
    http: reqwest::Client,
}

impl EmbeddingClient {
    /// Create a client for the configured provider.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown providers, a missing model, or a missing
    /// `OPENAI_API_KEY` when the provider is `openai`.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        match config.provider.as_str() {
            "disabled" => {}
            "openai" => {
                if config.model.is_none() {
                    bail!("embedding.model required for OpenAI provider");
                }
                if std::env::var("OPENAI_API_KEY").is_err() {
                    bail!("OPENAI_API_KEY environment variable not set");
                }
            }
            "ollama" => {
                if config.model.is_none() {
                    bail!("embedding.model required for Ollama provider");
                }
            }
            #[cfg(feature = "local-embeddings-fastembed")]
            "local" => {}
            #[cfg(not(feature = "local-embeddings-fastembed"))]
            "local" => bail!(
                "Local embedding provider requires --features local-embeddings-fastembed"
            ),
            other => bail!("Unknown embedding provider: {}", other),
        }

        Ok(Self {
            config: config.clone(),
            http: http::client_with_timeout(config.timeout_secs)?,
        })
    }

    /// Model identifier, or `"disabled"`.
    pub fn model_name(&self) -> &str {
        self.config.model.as_deref().unwrap_or("disabled")
    }

    /// Embed a batch of texts, returning one vector per input in order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let embedded = match self.config.provider.as_str() {
                "openai" => self.embed_openai(batch).await?,
                "ollama" => self.embed_ollama(batch).await?,
                #[cfg(feature = "local-embeddings-fastembed")]
                "local" => self.embed_local(batch).await?,
                "disabled" => bail!("Embedding provider is disabled"),
                other => bail!("Unknown embedding provider: {}", other),
            };
            if embedded.len() != batch.len() {
                bail!(
                    "embedding provider returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                );
            }
            check_dims(&embedded, self.config.dims)?;
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    async fn embed_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
        let body = serde_json::json!({
            "model": self.model_name(),
            "input": texts,
        });
        let json = http::post_json_with_retry(
            &self.http,
            "https://api.openai.com/v1/embeddings",
            Some(&api_key),
            &body,
            self.config.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }

    async fn embed_ollama(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self
            .config
            .url
            .as_deref()
            .unwrap_or("http://localhost:11434");
        let body = serde_json::json!({
            "model": self.model_name(),
            "input": texts,
        });
        let json = http::post_json_with_retry(
            &self.http,
            &format!("{}/api/embed", url),
            None,
            &body,
            self.config.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&json)
    }

    #[cfg(feature = "local-embeddings-fastembed")]
    async fn embed_local(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = match self.config.model.as_deref().unwrap_or("all-minilm-l6-v2") {
            "all-minilm-l6-v2" => fastembed::EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => fastembed::EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => fastembed::EmbeddingModel::BGEBaseENV15,
            "nomic-embed-text-v1.5" => fastembed::EmbeddingModel::NomicEmbedTextV15,
            other => bail!(
                "Unknown local embedding model: '{}'. Supported: all-minilm-l6-v2, \
                 bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5",
                other
            ),
        };
        let texts = texts.to_vec();
        let batch_size = self.config.batch_size;

        tokio::task::spawn_blocking(move || {
            let mut model = fastembed::TextEmbedding::try_new(fastembed::InitOptions::new(model))
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

/// Reject vectors whose length differs from the configured `dims`.
fn check_dims(vectors: &[Vec<f32>], dims: Option<usize>) -> Result<()> {
    let Some(expected) = dims else {
        return Ok(());
    };
    if let Some(v) = vectors.iter().find(|v| v.len() != expected) {
        bail!(
            "embedding provider returned {} dimensions, embedding.dims is {}",
            v.len(),
            expected
        );
    }
    Ok(())
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    data.iter()
        .map(|item| {
            item.get("embedding")
                .and_then(|e| e.as_array())
                .map(|arr| to_f32_vec(arr))
                .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))
        })
        .collect()
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            e.as_array()
                .map(|arr| to_f32_vec(arr))
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_parse_openai_response() {
        let json = serde_json::json!({ "data": [{ "embedding": [0.5, 1.0] }, { "embedding": [0.0, -1.0] }] });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![0.5, 1.0], vec![0.0, -1.0]]);
    }

    #[test]
    fn test_parse_ollama_response_rejects_missing_array() {
        let json = serde_json::json!({ "model": "nomic-embed-text" });
        assert!(parse_ollama_response(&json).is_err());
    }

    #[test]
    fn test_disabled_client_fails_to_embed() {
        let client = EmbeddingClient::new(&EmbeddingConfig::default()).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(client.embed(&["hello".to_string()]));
        assert!(result.is_err());
    }

    #[test]
    fn test_check_dims() {
        let vectors = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
        assert!(check_dims(&vectors, None).is_ok());
        assert!(check_dims(&vectors, Some(2)).is_ok());
        let err = check_dims(&vectors, Some(3)).unwrap_err();
        assert!(err.to_string().contains("embedding.dims is 3"));
    }
}
