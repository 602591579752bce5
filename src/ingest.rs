//! Ingestion pipeline orchestration.
//!
//! One upload runs extract → normalize + chunk → batch embed → replace the
//! document row and its chunk set in one store write. Any failure aborts the
//! upload: a new document is not created and an existing one keeps its
//! previous row and chunks.
//!
//! Embedding is soft: a chunk whose vector could not be computed is stored
//! with a NULL embedding and simply never matches a similarity search.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_document;
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingClient;
use crate::error::{Result, SupportError};
use crate::extract::{extract_text, FileFormat};
use crate::models::UploadResponse;
use crate::store::{DocumentInfo, VectorStore};

pub struct IngestionPipeline {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    chunking: ChunkingConfig,
    /// One async mutex per file id, so re-ingestions of the same file
    /// never interleave. Different files never contend.
    file_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chunking,
            file_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Ingest a new upload under a freshly generated file id.
    pub async fn ingest(&self, file_name: &str, bytes: &[u8]) -> Result<UploadResponse> {
        let file_id = Uuid::new_v4().to_string();
        self.reingest(&file_id, file_name, bytes).await
    }

    /// Ingest `bytes` under `file_id`, replacing any chunks stored for it.
    pub async fn reingest(
        &self,
        file_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<UploadResponse> {
        let file_id = file_id.trim();
        if file_id.is_empty() {
            return Err(SupportError::InvalidRequest("fileId must not be empty".into()));
        }
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(SupportError::InvalidRequest("fileName must not be empty".into()));
        }

        let lock = self.lock_for(file_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.ingest_locked(file_id, file_name, bytes).await
        };
        drop(lock);
        self.release_lock(file_id).await;
        result
    }

    async fn ingest_locked(
        &self,
        file_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<UploadResponse> {
        let format = FileFormat::from_file_name(file_name)?;
        let raw = extract_text(file_name, bytes)?;
        let (normalized, chunks) = chunk_document(file_id, file_name, &raw, &self.chunking);
        if chunks.is_empty() {
            return Err(SupportError::ExtractionFailure(format!(
                "{} contains no extractable text",
                file_name
            )));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = if self.embedder.is_enabled() {
            self.embedder.embed_batch(&texts).await
        } else {
            vec![None; texts.len()]
        };
        let embedded = embeddings.iter().filter(|e| e.is_some()).count();
        if self.embedder.is_enabled() && embedded < chunks.len() {
            warn!(
                file_id,
                missing = chunks.len() - embedded,
                "some chunks could not be embedded"
            );
        }

        let hash = content_hash(&normalized);
        let record = DocumentInfo {
            file_id,
            file_name,
            file_type: format.extension(),
            content_hash: &hash,
        };
        let doc = self.store.replace_document(record, &chunks, &embeddings).await?;
        let total = doc.total_chunks;

        info!(
            file_id,
            file_name,
            chunks = total,
            embedded,
            "document ingested"
        );

        Ok(UploadResponse {
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            total_chunks: total,
            message: format!(
                "Processed {} into {} chunks ({} embedded)",
                file_name, total, embedded
            ),
        })
    }

    /// Delete a document and its chunks. Serialized with any in-flight
    /// ingestion of the same file.
    pub async fn delete(&self, file_id: &str) -> Result<bool> {
        let lock = self.lock_for(file_id).await;
        let deleted = {
            let _guard = lock.lock().await;
            self.store.delete_document(file_id).await?
        };
        drop(lock);
        self.release_lock(file_id).await;
        if deleted {
            info!(file_id, "document deleted");
        }
        Ok(deleted)
    }

    async fn lock_for(&self, file_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.file_locks.lock().await;
        locks
            .entry(file_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the per-file mutex once nobody else holds a handle to it.
    async fn release_lock(&self, file_id: &str) {
        let mut locks = self.file_locks.lock().await;
        if let Some(lock) = locks.get(file_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(file_id);
            }
        }
    }
}

/// Hex SHA-256 of the normalized document text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledEmbedder;
    use crate::store::InMemoryVectorStore;
    use async_trait::async_trait;

    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingClient for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }
        async fn embed(&self, text: &str) -> Option<Vec<f32>> {
            Some(vec![text.len() as f32, 1.0])
        }
    }

    fn pipeline(embedder: Arc<dyn EmbeddingClient>) -> IngestionPipeline {
        IngestionPipeline::new(
            Arc::new(InMemoryVectorStore::new()),
            embedder,
            ChunkingConfig::default(),
        )
    }

    #[tokio::test]
    async fn ingest_stores_document_and_chunks() {
        let p = pipeline(Arc::new(LengthEmbedder));
        let text = "Fresh apples arrive every morning. ".repeat(40);
        let resp = p.ingest("faq.txt", text.as_bytes()).await.unwrap();
        assert!(resp.total_chunks > 1);

        let doc = p.store().get_document(&resp.file_id).await.unwrap().unwrap();
        assert_eq!(doc.file_type, "txt");
        assert_eq!(doc.total_chunks, resp.total_chunks);
        assert_eq!(doc.content_hash.len(), 64);
    }

    #[tokio::test]
    async fn reingest_replaces_chunk_set() {
        let p = pipeline(Arc::new(LengthEmbedder));
        let long = "Delivery windows open at eight. ".repeat(50);
        p.reingest("fixed", "policy.txt", long.as_bytes()).await.unwrap();
        let resp = p.reingest("fixed", "policy.txt", b"Short policy.").await.unwrap();

        assert_eq!(resp.total_chunks, 1);
        assert_eq!(p.store().list_documents().await.unwrap().len(), 1);
        assert_eq!(p.store().get_chunks("fixed").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let p = pipeline(Arc::new(DisabledEmbedder));
        let err = p.ingest("virus.exe", b"MZ").await.unwrap_err();
        assert!(matches!(err, SupportError::UnsupportedFormat(_)));
        assert!(p.store().list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_document_is_an_extraction_failure() {
        let p = pipeline(Arc::new(DisabledEmbedder));
        let err = p.ingest("blank.txt", b"   \n\t ").await.unwrap_err();
        assert!(matches!(err, SupportError::ExtractionFailure(_)));
    }

    #[tokio::test]
    async fn disabled_embedder_still_stores_chunks() {
        let p = pipeline(Arc::new(DisabledEmbedder));
        let resp = p.ingest("notes.txt", b"Organic milk is sold out.").await.unwrap();
        assert_eq!(resp.total_chunks, 1);
        assert!(p
            .store()
            .search_similar(&[1.0, 1.0], 5, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let p = pipeline(Arc::new(DisabledEmbedder));
        let resp = p.ingest("a.txt", b"hello").await.unwrap();
        assert!(p.delete(&resp.file_id).await.unwrap());
        assert!(!p.delete(&resp.file_id).await.unwrap());
    }

    #[tokio::test]
    async fn file_locks_are_released_after_each_upload() {
        let p = pipeline(Arc::new(LengthEmbedder));
        for i in 0..50 {
            p.ingest(&format!("note-{}.txt", i), b"Bread is baked daily.")
                .await
                .unwrap();
        }
        p.reingest("fixed", "policy.txt", b"Short policy.").await.unwrap();
        assert!(p.ingest("virus.exe", b"MZ").await.is_err());
        assert!(p.reingest("fixed", "blank.txt", b"  ").await.is_err());

        assert!(p.file_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_reingests_of_one_file_leave_one_document() {
        let p = Arc::new(pipeline(Arc::new(LengthEmbedder)));
        let mut handles = Vec::new();
        for i in 0..8 {
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                let text = format!("Version {} of the returns policy.", i);
                p.reingest("shared", "returns.txt", text.as_bytes()).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(p.store().list_documents().await.unwrap().len(), 1);
        assert_eq!(p.store().get_chunks("shared").await.unwrap().len(), 1);
        assert!(p.file_locks.lock().await.is_empty());
    }
}
