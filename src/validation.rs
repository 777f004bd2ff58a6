//! External validation of conflict candidates.
//!
//! The conflict detector escalates its strongest lexical candidates to a
//! [`ConflictValidator`]. The bundled [`LlmValidator`] asks a chat model
//! (OpenAI or Ollama) for a JSON verdict:
//!
//! ```json
//! { "conflict": true, "confidence": 0.8, "category": "numeric", "explanation": "..." }
//! ```
//!
//! A validator returning `Ok(None)` or `Err(_)` means "no result": the pair
//! keeps its lexical confidence.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::http;

/// Excerpts and context handed to a validator for one pair.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationRequest {
    pub title_a: String,
    pub title_b: String,
    pub text_a: String,
    pub text_b: String,
    /// Lexical indicators that made the pair a candidate.
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    #[serde(rename = "conflict")]
    pub is_conflict: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Capability interface for judging whether two excerpts contradict.
#[async_trait]
pub trait ConflictValidator: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(&self, request: &ValidationRequest) -> Result<Option<ValidationVerdict>>;
}

const SYSTEM_PROMPT: &str = "You compare two document excerpts and decide whether they contradict each other. \
Reply with a single JSON object and nothing else: \
{\"conflict\": boolean, \"confidence\": number between 0 and 1, \
\"category\": one of \"numeric\", \"temporal\", \"version\", \"procedural\", \"factual\", \"general\", \
\"explanation\": short string}.";

/// Chat-model validator for the `openai` and `ollama` providers.
pub struct LlmValidator {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmValidator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        match config.provider.as_str() {
            "openai" => {
                if std::env::var("OPENAI_API_KEY").is_err() {
                    bail!("OPENAI_API_KEY environment variable not set");
                }
            }
            "ollama" => {}
            other => bail!("Unsupported llm provider for validation: {}", other),
        }
        if config.model.is_none() {
            bail!("llm.model required for provider '{}'", config.provider);
        }
        Ok(Self {
            config: config.clone(),
            http: http::client_with_timeout(config.timeout_secs)?,
        })
    }

    fn model(&self) -> &str {
        self.config.model.as_deref().unwrap_or_default()
    }

    fn messages(request: &ValidationRequest) -> serde_json::Value {
        let user = format!(
            "Document A: {}\n---\n{}\n===\nDocument B: {}\n---\n{}\n===\nSuspected differences: {}",
            request.title_a, request.text_a, request.title_b, request.text_b, request.context
        );
        serde_json::json!([
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": user },
        ])
    }

    async fn chat_openai(&self, request: &ValidationRequest) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
        let base = self.config.url.as_deref().unwrap_or("https://api.openai.com");
        let body = serde_json::json!({
            "model": self.model(),
            "messages": Self::messages(request),
            "temperature": 0.0,
            "response_format": { "type": "json_object" },
        });
        let json = http::post_json_with_retry(
            &self.http,
            &format!("{}/v1/chat/completions", base.trim_end_matches('/')),
            Some(&api_key),
            &body,
            self.config.max_retries,
            "OpenAI",
        )
        .await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
    }

    async fn chat_ollama(&self, request: &ValidationRequest) -> Result<String> {
        let base = self.config.url.as_deref().unwrap_or("http://localhost:11434");
        let body = serde_json::json!({
            "model": self.model(),
            "messages": Self::messages(request),
            "stream": false,
            "format": "json",
        });
        let json = http::post_json_with_retry(
            &self.http,
            &format!("{}/api/chat", base.trim_end_matches('/')),
            None,
            &body,
            self.config.max_retries,
            "Ollama",
        )
        .await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message content"))
    }
}

#[async_trait]
impl ConflictValidator for LlmValidator {
    fn name(&self) -> &str {
        self.model()
    }

    async fn validate(&self, request: &ValidationRequest) -> Result<Option<ValidationVerdict>> {
        let content = match self.config.provider.as_str() {
            "openai" => self.chat_openai(request).await?,
            "ollama" => self.chat_ollama(request).await?,
            other => bail!("Unsupported llm provider for validation: {}", other),
        };
        Ok(parse_verdict(&content))
    }
}

/// Parse a model reply into a verdict, tolerating prose or code fences
/// around the JSON object. Unparseable replies yield `None`.
pub fn parse_verdict(content: &str) -> Option<ValidationVerdict> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    let mut verdict: ValidationVerdict = serde_json::from_str(&content[start..=end]).ok()?;
    verdict.confidence = if verdict.confidence.is_finite() {
        verdict.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    Some(verdict)
}

/// Build the configured validator, or `None` when validation is disabled.
pub fn create_validator(config: &LlmConfig) -> Result<Option<Arc<dyn ConflictValidator>>> {
    if !config.is_enabled() {
        return Ok(None);
    }
    let validator = LlmValidator::new(config)?;
    tracing::info!(provider = %config.provider, model = validator.model(), "conflict validation enabled");
    Ok(Some(Arc::new(validator)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict_plain_json() {
        let v = parse_verdict(r#"{"conflict": true, "confidence": 0.9, "category": "numeric", "explanation": "24 vs 4"}"#)
            .unwrap();
        assert!(v.is_conflict);
        assert_eq!(v.confidence, 0.9);
        assert_eq!(v.category.as_deref(), Some("numeric"));
    }

    #[test]
    fn test_parse_verdict_code_fence_and_clamp() {
        let v = parse_verdict("```json\n{\"conflict\": false, \"confidence\": 3.5}\n```").unwrap();
        assert!(!v.is_conflict);
        assert_eq!(v.confidence, 1.0);
        assert!(v.explanation.is_none());
    }

    #[test]
    fn test_parse_verdict_garbage() {
        assert!(parse_verdict("I think they agree.").is_none());
        assert!(parse_verdict(r#"{"confidence": 0.5}"#).is_none());
        assert!(parse_verdict("} oops {").is_none());
    }

    #[test]
    fn test_disabled_provider_yields_no_validator() {
        assert!(create_validator(&LlmConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_ollama_validator_requires_model() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            ..Default::default()
        };
        assert!(LlmValidator::new(&config).is_err());
    }

    #[test]
    fn test_messages_include_both_excerpts() {
        let request = ValidationRequest {
            title_a: "Auth".into(),
            title_b: "Tokens".into(),
            text_a: "expires in 24 hours".into(),
            text_b: "expires in 4 hours".into(),
            context: "24 hours vs 4 hours".into(),
        };
        let messages = LlmValidator::messages(&request);
        let user = messages[1]["content"].as_str().unwrap();
        assert!(user.contains("24 hours"));
        assert!(user.contains("Document B: Tokens"));
    }
}
