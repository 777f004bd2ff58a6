//! Text-similarity backends consumed by the similarity calculator.
//!
//! The calculator only ever asks two questions of a backend: how similar are
//! two texts, and does a text mention a term. [`LexicalNlp`] answers both
//! from term frequencies; [`EmbeddingNlp`] answers similarity from vectors
//! produced by an [`EmbeddingClient`] ahead of time.
//!
//! Backends are synchronous. Any network work (embedding) happens once per
//! invocation in [`EmbeddingNlp::prepare`], before scoring starts.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{cosine_similarity, EmbeddingClient};

/// Capability interface for text similarity and term presence.
pub trait NlpBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Similarity of two texts in `[0.0, 1.0]`.
    ///
    /// An `Err` is neutralized by the caller to a score of `0.0`.
    fn text_similarity(&self, a: &str, b: &str) -> Result<f64>;

    /// Whether `text` mentions `term` as a whole word, case-insensitively.
    fn contains_term(&self, text: &str, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return false;
        }
        let needle: Vec<String> = tokenize(&term);
        if needle.is_empty() {
            return false;
        }
        let haystack = tokenize(text);
        haystack
            .windows(needle.len())
            .any(|window| window == needle.as_slice())
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
];

/// Lower-cased alphanumeric tokens, in order.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut tf = HashMap::new();
    for token in tokenize(text) {
        if token.len() < 2 || STOP_WORDS.contains(&token.as_str()) {
            continue;
        }
        *tf.entry(token).or_insert(0.0) += 1.0;
    }
    tf
}

/// Term-frequency cosine similarity over stop-word-filtered tokens.
#[derive(Debug, Default, Clone)]
pub struct LexicalNlp;

impl NlpBackend for LexicalNlp {
    fn name(&self) -> &str {
        "lexical"
    }

    fn text_similarity(&self, a: &str, b: &str) -> Result<f64> {
        let ta = term_frequencies(a);
        let tb = term_frequencies(b);
        if ta.is_empty() || tb.is_empty() {
            return Ok(0.0);
        }

        let dot: f64 = ta
            .iter()
            .filter_map(|(term, wa)| tb.get(term).map(|wb| wa * wb))
            .sum();
        let norm_a = ta.values().map(|w| w * w).sum::<f64>().sqrt();
        let norm_b = tb.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm_a < f64::EPSILON || norm_b < f64::EPSILON {
            return Ok(0.0);
        }
        Ok((dot / (norm_a * norm_b)).clamp(0.0, 1.0))
    }
}

/// Cosine similarity over pre-computed embedding vectors.
///
/// Vectors are keyed by the SHA-256 of the text they embed. Asking about a
/// text that was not prepared is an error, which the calculator turns into a
/// zero semantic score.
#[derive(Debug, Default)]
pub struct EmbeddingNlp {
    model: String,
    vectors: HashMap<String, Vec<f32>>,
}

impl EmbeddingNlp {
    /// Embed every distinct non-empty text once and build the lookup table.
    pub async fn prepare(client: &EmbeddingClient, texts: &[&str]) -> Result<Self> {
        let mut pending: Vec<(String, String)> = Vec::new();
        for text in texts {
            if text.trim().is_empty() {
                continue;
            }
            let key = text_hash(text);
            if !pending.iter().any(|(k, _)| k == &key) {
                pending.push((key, text.to_string()));
            }
        }

        let inputs: Vec<String> = pending.iter().map(|(_, t)| t.clone()).collect();
        let embedded = client.embed(&inputs).await?;

        let vectors = pending
            .into_iter()
            .map(|(key, _)| key)
            .zip(embedded)
            .collect::<HashMap<_, _>>();

        tracing::debug!(model = client.model_name(), texts = vectors.len(), "embedded candidate texts");
        Ok(Self {
            model: client.model_name().to_string(),
            vectors,
        })
    }

    /// Build directly from `(text, vector)` pairs.
    pub fn from_vectors<I>(model: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        Self {
            model: model.into(),
            vectors: entries
                .into_iter()
                .map(|(text, v)| (text_hash(&text), v))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

impl NlpBackend for EmbeddingNlp {
    fn name(&self) -> &str {
        &self.model
    }

    fn text_similarity(&self, a: &str, b: &str) -> Result<f64> {
        let va = match self.vectors.get(&text_hash(a)) {
            Some(v) => v,
            None => bail!("no embedding prepared for text"),
        };
        let vb = match self.vectors.get(&text_hash(b)) {
            Some(v) => v,
            None => bail!("no embedding prepared for text"),
        };
        Ok((cosine_similarity(va, vb) as f64).clamp(0.0, 1.0))
    }
}

fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build the backend selected by `[nlp] backend` for one invocation.
///
/// The embedding backend degrades to [`LexicalNlp`] when the provider fails,
/// so the semantic metric is never lost to a transient outage.
pub async fn backend_for(config: &Config, texts: &[&str]) -> Arc<dyn NlpBackend> {
    if config.nlp.backend != "embedding" {
        return Arc::new(LexicalNlp);
    }

    let prepared = match EmbeddingClient::new(&config.embedding) {
        Ok(client) => EmbeddingNlp::prepare(&client, texts).await,
        Err(e) => Err(e),
    };
    match prepared {
        Ok(nlp) => Arc::new(nlp),
        Err(e) => {
            tracing::warn!(%e, "embedding backend unavailable, falling back to lexical similarity");
            Arc::new(LexicalNlp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_identical_texts() {
        let nlp = LexicalNlp;
        let s = nlp
            .text_similarity("Token expires after one day", "Token expires after one day")
            .unwrap();
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_lexical_disjoint_texts() {
        let nlp = LexicalNlp;
        let s = nlp.text_similarity("database migration", "frontend styling").unwrap();
        assert_eq!(s, 0.0);
    }

    #[test]
    fn test_lexical_symmetric() {
        let nlp = LexicalNlp;
        let a = "Deploy the auth service with helm";
        let b = "The auth service runs on kubernetes";
        assert_eq!(
            nlp.text_similarity(a, b).unwrap(),
            nlp.text_similarity(b, a).unwrap()
        );
    }

    #[test]
    fn test_stop_words_only_scores_zero() {
        let nlp = LexicalNlp;
        assert_eq!(nlp.text_similarity("the and of", "the and of").unwrap(), 0.0);
    }

    #[test]
    fn test_contains_term_whole_words() {
        let nlp = LexicalNlp;
        assert!(nlp.contains_term("Rotate the OAuth token daily", "oauth token"));
        assert!(!nlp.contains_term("Rotate the OAuth tokens daily", "oauth token"));
        assert!(!nlp.contains_term("anything", "  "));
    }

    #[test]
    fn test_embedding_nlp_lookup() {
        let nlp = EmbeddingNlp::from_vectors(
            "test-model",
            vec![
                ("alpha".to_string(), vec![1.0, 0.0]),
                ("beta".to_string(), vec![1.0, 0.0]),
                ("gamma".to_string(), vec![-1.0, 0.0]),
            ],
        );
        assert_eq!(nlp.len(), 3);
        assert!((nlp.text_similarity("alpha", "beta").unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(nlp.text_similarity("alpha", "gamma").unwrap(), 0.0);
        assert!(nlp.text_similarity("alpha", "unknown").is_err());
    }

    #[tokio::test]
    async fn test_backend_for_defaults_to_lexical() {
        let config = Config::minimal();
        let nlp = backend_for(&config, &["a text"]).await;
        assert_eq!(nlp.name(), "lexical");
    }
}
