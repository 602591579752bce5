//! Context retrieval for chat answers.
//!
//! [`RetrievalService`] answers "find document context for question Q". The
//! implementation is chosen by `[retrieval] mode`:
//!
//! - `local`: embed the question and search this service's [`VectorStore`].
//! - `remote`: POST the question to another deployment's
//!   `/api/retrieval/query` endpoint and use its answer as-is.
//!
//! A failed question embedding or a search with no hits is a valid empty
//! result (`has_context == false`), not an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingClient;
use crate::error::{Result, SupportError};
use crate::models::{RetrievalResult, ScoredChunk};
use crate::store::VectorStore;

/// Separator placed between chunk blocks in the concatenated context.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[async_trait]
pub trait RetrievalService: Send + Sync {
    /// Find context for `question`, optionally scoped to one document.
    /// `top_k` falls back to the configured default.
    async fn retrieve(
        &self,
        question: &str,
        file_id: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<RetrievalResult>;
}

/// Build the context string for ranked hits, best first.
///
/// Each block is annotated with its source file and 1-based chunk number.
pub fn build_result(chunks: Vec<ScoredChunk>) -> RetrievalResult {
    if chunks.is_empty() {
        return RetrievalResult::empty();
    }
    let context = chunks
        .iter()
        .map(|c| {
            format!(
                "[Source: {}, chunk {}]\n{}",
                c.file_name,
                c.chunk_index + 1,
                c.text
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    RetrievalResult {
        context,
        chunks,
        has_context: true,
    }
}

// ============ Local ============

pub struct LocalRetrieval {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    top_k: usize,
    min_similarity: f32,
}

impl LocalRetrieval {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            top_k: config.top_k.max(1),
            min_similarity: config.min_similarity,
        }
    }
}

#[async_trait]
impl RetrievalService for LocalRetrieval {
    async fn retrieve(
        &self,
        question: &str,
        file_id: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<RetrievalResult> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(RetrievalResult::empty());
        }

        let query_vec = match self.embedder.embed(question).await {
            Some(v) => v,
            None => {
                debug!("question could not be embedded; no context");
                return Ok(RetrievalResult::empty());
            }
        };

        let k = top_k.unwrap_or(self.top_k).max(1);
        let mut hits = self.store.search_similar(&query_vec, k, file_id).await?;
        hits.retain(|h| h.similarity >= self.min_similarity);

        debug!(hits = hits.len(), ?file_id, "local retrieval");
        Ok(build_result(hits))
    }
}

// ============ Remote ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteQuery<'a> {
    question: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_id: Option<&'a str>,
    top_k: usize,
}

/// Delegates retrieval to another deployment over HTTP.
pub struct RemoteRetrieval {
    client: reqwest::Client,
    endpoint: String,
    top_k: usize,
}

impl RemoteRetrieval {
    pub fn new(config: &RetrievalConfig) -> Result<Self> {
        let base = config.remote_url.as_deref().ok_or_else(|| {
            SupportError::InvalidRequest("retrieval.remote_url is not set".into())
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SupportError::Other(e.into()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/retrieval/query", base.trim_end_matches('/')),
            top_k: config.top_k.max(1),
        })
    }
}

#[async_trait]
impl RetrievalService for RemoteRetrieval {
    async fn retrieve(
        &self,
        question: &str,
        file_id: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<RetrievalResult> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(RetrievalResult::empty());
        }
        let body = RemoteQuery {
            question,
            file_id,
            top_k: top_k.unwrap_or(self.top_k).max(1),
        };

        let response = match self.client.post(&self.endpoint).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "remote retrieval unreachable");
                return Ok(RetrievalResult::empty());
            }
        };
        if !response.status().is_success() {
            warn!(endpoint = %self.endpoint, status = %response.status(), "remote retrieval failed");
            return Ok(RetrievalResult::empty());
        }
        match response.json::<RetrievalResult>().await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(error = %e, "remote retrieval returned malformed payload");
                Ok(RetrievalResult::empty())
            }
        }
    }
}

/// Build the retrieval service selected by `config.mode`.
pub fn create_retrieval(
    config: &RetrievalConfig,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
) -> Result<Arc<dyn RetrievalService>> {
    match config.mode.as_str() {
        "local" => Ok(Arc::new(LocalRetrieval::new(store, embedder, config))),
        "remote" => Ok(Arc::new(RemoteRetrieval::new(config)?)),
        other => Err(SupportError::InvalidRequest(format!(
            "unknown retrieval mode: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledEmbedder;
    use crate::models::Chunk;
    use crate::store::{DocumentInfo, InMemoryVectorStore};

    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingClient for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        async fn embed(&self, text: &str) -> Option<Vec<f32>> {
            Some(if text.contains("milk") {
                vec![1.0, 0.0]
            } else {
                vec![0.0, 1.0]
            })
        }
    }

    async fn seeded_store() -> Arc<dyn VectorStore> {
        let store = InMemoryVectorStore::new();
        let chunks = vec![
            Chunk {
                chunk_id: "f1_chunk_0".into(),
                file_id: "f1".into(),
                file_name: "dairy.txt".into(),
                chunk_index: 0,
                text: "Eggs are kept cold.".into(),
                start_offset: 0,
                end_offset: 19,
            },
            Chunk {
                chunk_id: "f1_chunk_1".into(),
                file_id: "f1".into(),
                file_name: "dairy.txt".into(),
                chunk_index: 1,
                text: "Milk keeps for seven days.".into(),
                start_offset: 19,
                end_offset: 45,
            },
        ];
        let info = DocumentInfo {
            file_id: "f1",
            file_name: "dairy.txt",
            file_type: "txt",
            content_hash: "h",
        };
        store
            .replace_document(info, &chunks, &[Some(vec![0.0, 1.0]), Some(vec![1.0, 0.0])])
            .await
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn local_retrieval_ranks_and_annotates() {
        let svc = LocalRetrieval::new(
            seeded_store().await,
            Arc::new(AxisEmbedder),
            &RetrievalConfig::default(),
        );
        let result = svc.retrieve("how long does milk last", None, None).await.unwrap();
        assert!(result.has_context);
        assert_eq!(result.chunks[0].chunk_id, "f1_chunk_1");
        assert!(result
            .context
            .starts_with("[Source: dairy.txt, chunk 2]\nMilk keeps for seven days."));
        assert!(result.context.contains(CONTEXT_SEPARATOR));
    }

    #[tokio::test]
    async fn min_similarity_filters_weak_hits() {
        let config = RetrievalConfig {
            min_similarity: 0.5,
            ..RetrievalConfig::default()
        };
        let svc = LocalRetrieval::new(seeded_store().await, Arc::new(AxisEmbedder), &config);
        let result = svc.retrieve("milk", None, None).await.unwrap();
        assert_eq!(result.chunks.len(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_means_no_context() {
        let svc = LocalRetrieval::new(
            seeded_store().await,
            Arc::new(DisabledEmbedder),
            &RetrievalConfig::default(),
        );
        let result = svc.retrieve("milk", None, None).await.unwrap();
        assert!(!result.has_context);
        assert!(result.context.is_empty());
    }

    #[test]
    fn empty_hits_build_empty_result() {
        assert_eq!(build_result(Vec::new()), RetrievalResult::empty());
    }

    #[test]
    fn remote_requires_url() {
        let config = RetrievalConfig {
            mode: "remote".into(),
            ..RetrievalConfig::default()
        };
        assert!(RemoteRetrieval::new(&config).is_err());
    }
}
