//! In-memory [`VectorStore`] for tests and ephemeral deployments.
//!
//! All state sits behind a single `RwLock`, so chunk replacement is atomic
//! with respect to concurrent searches. Nothing is persisted.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{Result, SupportError};
use crate::models::{Chunk, Document, ScoredChunk};

use super::{check_chunk_batch, rank_candidates, Candidate, DocumentInfo, VectorStore};

#[derive(Default)]
struct Inner {
    documents: HashMap<String, Document>,
    /// file_id -> chunks in ordinal order, each with its optional vector.
    chunks: HashMap<String, Vec<(Chunk, Option<Vec<f32>>)>>,
    /// Document insertion order, so scans are deterministic.
    order: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    inner: RwLock<Inner>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| SupportError::Other(anyhow::anyhow!("vector store lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| SupportError::Other(anyhow::anyhow!("vector store lock poisoned")))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn replace_document(
        &self,
        info: DocumentInfo<'_>,
        chunks: &[Chunk],
        embeddings: &[Option<Vec<f32>>],
    ) -> Result<Document> {
        check_chunk_batch(info.file_id, chunks, embeddings)?;

        let doc = Document {
            file_id: info.file_id.to_string(),
            file_name: info.file_name.to_string(),
            file_type: info.file_type.to_string(),
            content_hash: info.content_hash.to_string(),
            uploaded_at: chrono::Utc::now().timestamp(),
            total_chunks: chunks.len() as i64,
        };
        let rows = chunks.iter().cloned().zip(embeddings.iter().cloned()).collect();

        let mut inner = self.write()?;
        if inner.documents.insert(doc.file_id.clone(), doc.clone()).is_none() {
            inner.order.push(doc.file_id.clone());
        }
        inner.chunks.insert(doc.file_id.clone(), rows);
        Ok(doc)
    }

    async fn save_document(&self, info: DocumentInfo<'_>) -> Result<Document> {
        let mut inner = self.write()?;
        let total_chunks = inner
            .documents
            .get(info.file_id)
            .map(|d| d.total_chunks)
            .unwrap_or(0);
        let doc = Document {
            file_id: info.file_id.to_string(),
            file_name: info.file_name.to_string(),
            file_type: info.file_type.to_string(),
            content_hash: info.content_hash.to_string(),
            uploaded_at: chrono::Utc::now().timestamp(),
            total_chunks,
        };
        if inner.documents.insert(doc.file_id.clone(), doc.clone()).is_none() {
            inner.order.push(doc.file_id.clone());
        }
        Ok(doc)
    }

    async fn save_chunks(
        &self,
        file_id: &str,
        chunks: &[Chunk],
        embeddings: &[Option<Vec<f32>>],
    ) -> Result<usize> {
        check_chunk_batch(file_id, chunks, embeddings)?;

        let mut inner = self.write()?;
        let doc = inner
            .documents
            .get_mut(file_id)
            .ok_or_else(|| SupportError::NotFound(file_id.to_string()))?;
        doc.total_chunks = chunks.len() as i64;

        let rows = chunks.iter().cloned().zip(embeddings.iter().cloned()).collect();
        inner.chunks.insert(file_id.to_string(), rows);
        Ok(chunks.len())
    }

    async fn search_similar(
        &self,
        query: &[f32],
        top_k: usize,
        file_id: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        let inner = self.read()?;
        let candidates = inner
            .order
            .iter()
            .filter(|fid| file_id.map_or(true, |wanted| wanted == fid.as_str()))
            .filter_map(|fid| inner.chunks.get(fid))
            .flatten()
            .filter_map(|(chunk, vector)| {
                vector.as_ref().map(|v| Candidate {
                    chunk_id: chunk.chunk_id.clone(),
                    file_id: chunk.file_id.clone(),
                    file_name: chunk.file_name.clone(),
                    chunk_index: chunk.chunk_index,
                    text: chunk.text.clone(),
                    vector: v.clone(),
                })
            });
        Ok(rank_candidates(query, candidates, top_k))
    }

    async fn delete_document(&self, file_id: &str) -> Result<bool> {
        let mut inner = self.write()?;
        let existed = inner.documents.remove(file_id).is_some();
        inner.chunks.remove(file_id);
        inner.order.retain(|f| f != file_id);
        Ok(existed)
    }

    async fn get_document(&self, file_id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.documents.get(file_id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let inner = self.read()?;
        let mut docs: Vec<Document> = inner
            .order
            .iter()
            .rev()
            .filter_map(|fid| inner.documents.get(fid).cloned())
            .collect();
        docs.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(docs)
    }

    async fn get_chunks(&self, file_id: &str) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        Ok(inner
            .chunks
            .get(file_id)
            .map(|rows| rows.iter().map(|(c, _)| c.clone()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chunk_id;

    fn chunk(file_id: &str, index: i64, text: &str) -> Chunk {
        Chunk {
            chunk_id: chunk_id(file_id, index),
            file_id: file_id.to_string(),
            file_name: format!("{}.txt", file_id),
            chunk_index: index,
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.chars().count(),
        }
    }

    fn info(file_id: &str) -> DocumentInfo<'_> {
        DocumentInfo {
            file_id,
            file_name: file_id,
            file_type: "txt",
            content_hash: "h",
        }
    }

    #[tokio::test]
    async fn save_and_search() {
        let store = InMemoryVectorStore::new();
        store
            .replace_document(
                info("a"),
                &[chunk("a", 0, "apples"), chunk("a", 1, "bananas")],
                &[Some(vec![1.0, 0.0]), Some(vec![0.0, 1.0])],
            )
            .await
            .unwrap();

        let hits = store.search_similar(&[0.0, 1.0], 5, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "a_chunk_1");
        assert_eq!(
            store.get_document("a").await.unwrap().unwrap().total_chunks,
            2
        );
    }

    #[tokio::test]
    async fn replace_drops_previous_chunks() {
        let store = InMemoryVectorStore::new();
        store
            .replace_document(
                info("a"),
                &[chunk("a", 0, "x"), chunk("a", 1, "y"), chunk("a", 2, "z")],
                &[None, None, None],
            )
            .await
            .unwrap();
        store
            .replace_document(info("a"), &[chunk("a", 0, "only")], &[Some(vec![1.0])])
            .await
            .unwrap();

        let chunks = store.get_chunks("a").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "only");
        assert_eq!(store.list_documents().await.unwrap().len(), 1);
        assert_eq!(store.get_document("a").await.unwrap().unwrap().total_chunks, 1);
    }

    #[tokio::test]
    async fn file_filter_and_delete() {
        let store = InMemoryVectorStore::new();
        for fid in ["a", "b"] {
            store
                .replace_document(info(fid), &[chunk(fid, 0, fid)], &[Some(vec![1.0, 1.0])])
                .await
                .unwrap();
        }
        let hits = store.search_similar(&[1.0, 1.0], 5, Some("b")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_id, "b");

        assert!(store.delete_document("b").await.unwrap());
        assert!(!store.delete_document("b").await.unwrap());
        assert!(store.get_chunks("b").await.unwrap().is_empty());
        assert!(store.search_similar(&[1.0, 1.0], 5, Some("b")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_batch_creates_nothing() {
        let store = InMemoryVectorStore::new();
        let err = store
            .replace_document(info("a"), &[chunk("a", 0, "x")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SupportError::InvalidRequest(_)));
        assert!(store.get_document("a").await.unwrap().is_none());

        let err = store
            .replace_document(info("a"), &[chunk("b", 0, "x")], &[None])
            .await
            .unwrap_err();
        assert!(matches!(err, SupportError::InvalidRequest(_)));
        assert!(store.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_chunks_needs_a_saved_document() {
        let store = InMemoryVectorStore::new();
        let err = store
            .save_chunks("a", &[chunk("a", 0, "x")], &[None])
            .await
            .unwrap_err();
        assert!(matches!(err, SupportError::NotFound(_)));

        store.save_document(info("a")).await.unwrap();
        store
            .save_chunks("a", &[chunk("a", 0, "x")], &[Some(vec![1.0])])
            .await
            .unwrap();
        assert_eq!(store.get_document("a").await.unwrap().unwrap().total_chunks, 1);
    }
}
