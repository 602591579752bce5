//! Embedding client abstraction and implementations.
//!
//! Defines the [`EmbeddingClient`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]**: always yields `None`; used when embeddings are
//!   not configured or credentials are missing.
//! - **[`OpenAiEmbedder`]**: calls an OpenAI-compatible `/embeddings` endpoint.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed`.
//!
//! Clients never return errors to callers. Disabled configuration, blank
//! input, transport failures and malformed payloads all collapse to `None`
//! after being logged, which the ingestion and retrieval layers treat as
//! "no vector".
//!
//! Also provides the vector utilities used by the store:
//! - [`cosine_similarity`]
//! - [`vec_to_blob`] / [`blob_to_vec`] for SQLite BLOB storage
//!
//! # Retry Strategy
//!
//! HTTP 429 and 5xx responses and network errors are retried with
//! exponential backoff (1s, 2s, 4s, ... capped at 32s). Other 4xx responses
//! fail immediately.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::SupportError;

/// Converts text into dense vectors.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Whether this client can produce vectors at all.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Embed one text. `None` on blank input or any failure.
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;

    /// Embed texts one at a time, preserving order. A failed item leaves a
    /// `None` at its position.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await);
        }
        out
    }
}

// ============ Disabled ============

/// A no-op client used when embeddings are not configured.
pub struct DisabledEmbedder;

#[async_trait]
impl EmbeddingClient for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }
}

// ============ Shared HTTP plumbing ============

async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("{} returned {}: {}", url, status, body_text));
                    continue;
                }
                bail!("{} returned {}: {}", url, status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding request failed after retries")))
}

fn json_to_vec(value: &serde_json::Value) -> Option<Vec<f32>> {
    let arr = value.as_array()?;
    let vec: Vec<f32> = arr
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<f32>>>()?;
    if vec.is_empty() {
        None
    } else {
        Some(vec)
    }
}

/// Accept a parsed vector only if it is present and, when `dims` is
/// configured, exactly that long. Vectors of another length would never
/// match anything already stored.
pub fn checked_vector(
    parsed: Option<Vec<f32>>,
    dims: Option<usize>,
) -> std::result::Result<Vec<f32>, SupportError> {
    let vec = parsed.ok_or_else(|| {
        SupportError::EmbeddingUnavailable("response carried no embedding".to_string())
    })?;
    match dims {
        Some(expected) if vec.len() != expected => Err(SupportError::EmbeddingUnavailable(
            format!("expected {} dimensions, got {}", expected, vec.len()),
        )),
        _ => Ok(vec),
    }
}

// ============ OpenAI ============

/// Embedding client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    dims: Option<usize>,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            url: format!("{}/embeddings", base.trim_end_matches('/')),
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
pub fn parse_openai_embedding(json: &serde_json::Value) -> Option<Vec<f32>> {
    json.get("data")?
        .as_array()?
        .first()?
        .get("embedding")
        .and_then(json_to_vec)
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }
        let body = serde_json::json!({ "model": self.model, "input": text });
        let result = post_json_with_retry(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await
        .map_err(|e| SupportError::EmbeddingUnavailable(e.to_string()))
        .and_then(|json| checked_vector(parse_openai_embedding(&json), self.dims));

        match result {
            Ok(vec) => Some(vec),
            Err(e) => {
                warn!(error = %e, model = %self.model, "OpenAI embedding failed");
                None
            }
        }
    }
}

// ============ Ollama ============

/// Embedding client for a local Ollama instance.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    url: String,
    dims: Option<usize>,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            url: format!("{}/api/embed", base.trim_end_matches('/')),
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }
}

/// Extract `embeddings[0]` from an Ollama `/api/embed` response.
pub fn parse_ollama_embedding(json: &serde_json::Value) -> Option<Vec<f32>> {
    json.get("embeddings")?.as_array()?.first().and_then(json_to_vec)
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }
        let body = serde_json::json!({ "model": self.model, "input": text });
        let result = post_json_with_retry(&self.client, &self.url, None, &body, self.max_retries)
            .await
            .map_err(|e| SupportError::EmbeddingUnavailable(e.to_string()))
            .and_then(|json| checked_vector(parse_ollama_embedding(&json), self.dims));

        match result {
            Ok(vec) => Some(vec),
            Err(e) => {
                warn!(error = %e, url = %self.url, "Ollama embedding failed (is Ollama running?)");
                None
            }
        }
    }
}

/// Build the configured [`EmbeddingClient`].
///
/// | Config Value | Client |
/// |-------------|--------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`], or disabled when `OPENAI_API_KEY` is unset |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Ok(Arc::new(OpenAiEmbedder::new(config, key)?)),
            _ => {
                warn!("OPENAI_API_KEY not set; embeddings disabled");
                Ok(Arc::new(DisabledEmbedder))
            }
        },
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing bytes that do not form a
/// full `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity of two vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or when
/// either magnitude is zero.
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
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_magnitude_and_mismatch() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn parses_openai_payload() {
        let json = serde_json::json!({ "data": [ { "index": 0, "embedding": [0.5, -0.25] } ] });
        assert_eq!(parse_openai_embedding(&json), Some(vec![0.5, -0.25]));
        assert_eq!(parse_openai_embedding(&serde_json::json!({ "data": [] })), None);
        assert_eq!(parse_openai_embedding(&serde_json::json!({ "error": "x" })), None);
    }

    #[test]
    fn parses_ollama_payload() {
        let json = serde_json::json!({ "embeddings": [[1.0, 2.0, 3.0]] });
        assert_eq!(parse_ollama_embedding(&json), Some(vec![1.0, 2.0, 3.0]));
        let bad = serde_json::json!({ "embeddings": [["a"]] });
        assert_eq!(parse_ollama_embedding(&bad), None);
    }

    #[test]
    fn checked_vector_enforces_configured_dims() {
        assert_eq!(checked_vector(Some(vec![1.0, 2.0]), Some(2)).unwrap(), vec![1.0, 2.0]);
        assert_eq!(checked_vector(Some(vec![1.0, 2.0]), None).unwrap().len(), 2);

        let err = checked_vector(Some(vec![1.0, 2.0, 3.0]), Some(2)).unwrap_err();
        assert!(matches!(err, SupportError::EmbeddingUnavailable(_)));
        assert!(err.to_string().contains("expected 2 dimensions, got 3"));

        let err = checked_vector(None, Some(2)).unwrap_err();
        assert!(matches!(err, SupportError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn disabled_embedder_yields_none_holes() {
        let embedder = DisabledEmbedder;
        assert!(!embedder.is_enabled());
        let out = embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await;
        assert_eq!(out, vec![None, None]);
    }

    #[test]
    fn create_embedder_disabled_by_default() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_name(), "disabled");
    }
}
