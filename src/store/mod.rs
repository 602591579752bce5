//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait covers document bookkeeping, chunk replacement
//! and brute-force top-K cosine search. Two backends implement it:
//! [`SqliteVectorStore`](sqlite::SqliteVectorStore) for deployments and
//! [`InMemoryVectorStore`](memory::InMemoryVectorStore) for tests and
//! ephemeral use.
//!
//! Search is a full scan. There is no index or approximate search, so the
//! corpus must stay small enough for a linear pass per query.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Result, SupportError};
use crate::models::{Chunk, Document, ScoredChunk};

pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

/// Document-level fields of one ingestion. The store stamps `uploaded_at`
/// and derives `total_chunks` from the chunk set it is given.
#[derive(Debug, Clone, Copy)]
pub struct DocumentInfo<'a> {
    pub file_id: &'a str,
    pub file_name: &'a str,
    pub file_type: &'a str,
    pub content_hash: &'a str,
}

/// Durable chunk + vector storage.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_document`](VectorStore::replace_document) | Upsert a document and swap in its chunk set atomically |
/// | [`save_document`](VectorStore::save_document) | Upsert a document row by file id |
/// | [`save_chunks`](VectorStore::save_chunks) | Replace every chunk of an existing file and set `total_chunks` |
/// | [`search_similar`](VectorStore::search_similar) | Top-K cosine search, optionally file-scoped |
/// | [`delete_document`](VectorStore::delete_document) | Remove a document and its chunks |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or update the document row and replace all of its chunks,
    /// storing `embeddings[i]` alongside `chunks[i]`, as one unit of work.
    ///
    /// On error nothing changes: a new document is not created and an
    /// existing one keeps its row and previous chunk set.
    async fn replace_document(
        &self,
        info: DocumentInfo<'_>,
        chunks: &[Chunk],
        embeddings: &[Option<Vec<f32>>],
    ) -> Result<Document>;

    /// Insert or update the document row alone. An existing row keeps its
    /// `total_chunks`. Commits on its own, so ingestion goes through
    /// [`replace_document`](VectorStore::replace_document) instead.
    async fn save_document(&self, info: DocumentInfo<'_>) -> Result<Document>;

    /// Replace all chunks of an existing `file_id` and update its
    /// `total_chunks` in the same unit of work. Returns the number written.
    async fn save_chunks(
        &self,
        file_id: &str,
        chunks: &[Chunk],
        embeddings: &[Option<Vec<f32>>],
    ) -> Result<usize>;

    /// Rank stored chunk vectors by cosine similarity to `query`.
    ///
    /// Chunks without a vector, or whose vector length differs from the
    /// query's, are skipped. Ties keep storage order.
    async fn search_similar(
        &self,
        query: &[f32],
        top_k: usize,
        file_id: Option<&str>,
    ) -> Result<Vec<ScoredChunk>>;

    /// Delete a document and its chunks. Returns whether it existed.
    async fn delete_document(&self, file_id: &str) -> Result<bool>;

    async fn get_document(&self, file_id: &str) -> Result<Option<Document>>;

    /// All documents, most recently uploaded first.
    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Chunks of one document in ordinal order.
    async fn get_chunks(&self, file_id: &str) -> Result<Vec<Chunk>>;
}

/// Reject a chunk batch whose vectors don't line up with its chunks, or
/// that carries chunks of another file.
pub fn check_chunk_batch(
    file_id: &str,
    chunks: &[Chunk],
    embeddings: &[Option<Vec<f32>>],
) -> Result<()> {
    if chunks.len() != embeddings.len() {
        return Err(SupportError::InvalidRequest(format!(
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        )));
    }
    if let Some(stray) = chunks.iter().find(|c| c.file_id != file_id) {
        return Err(SupportError::InvalidRequest(format!(
            "chunk {} does not belong to {}",
            stray.chunk_id, file_id
        )));
    }
    Ok(())
}

/// A stored chunk with its vector, as fed to [`rank_candidates`].
pub struct Candidate {
    pub chunk_id: String,
    pub file_id: String,
    pub file_name: String,
    pub chunk_index: i64,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Score candidates against `query`, keep the `top_k` best.
///
/// Mismatched-length vectors are dropped rather than scored. The sort is
/// stable, so equal scores stay in input order.
pub fn rank_candidates(
    query: &[f32],
    candidates: impl IntoIterator<Item = Candidate>,
    top_k: usize,
) -> Vec<ScoredChunk> {
    if top_k == 0 || query.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<ScoredChunk> = candidates
        .into_iter()
        .filter(|c| c.vector.len() == query.len())
        .map(|c| ScoredChunk {
            similarity: cosine_similarity(query, &c.vector),
            chunk_id: c.chunk_id,
            file_id: c.file_id,
            file_name: c.file_name,
            chunk_index: c.chunk_index,
            text: c.text,
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, vector: Vec<f32>) -> Candidate {
        Candidate {
            chunk_id: id.to_string(),
            file_id: "f".to_string(),
            file_name: "f.txt".to_string(),
            chunk_index: 0,
            text: id.to_string(),
            vector,
        }
    }

    #[test]
    fn identical_vector_ranks_first_with_similarity_one() {
        let ranked = rank_candidates(
            &[1.0, 2.0, 3.0],
            vec![
                cand("a", vec![3.0, 2.0, 1.0]),
                cand("b", vec![1.0, 2.0, 3.0]),
                cand("c", vec![0.0, 0.0, 1.0]),
            ],
            3,
        );
        assert_eq!(ranked[0].chunk_id, "b");
        assert!((ranked[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_are_skipped() {
        let ranked = rank_candidates(
            &[1.0, 0.0],
            vec![cand("short", vec![1.0]), cand("ok", vec![1.0, 0.0])],
            5,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].chunk_id, "ok");
    }

    #[test]
    fn ties_keep_input_order_and_top_k_truncates() {
        let ranked = rank_candidates(
            &[1.0, 0.0],
            vec![
                cand("first", vec![2.0, 0.0]),
                cand("second", vec![5.0, 0.0]),
                cand("third", vec![1.0, 0.0]),
            ],
            2,
        );
        let ids: Vec<&str> = ranked.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn zero_top_k_returns_nothing() {
        assert!(rank_candidates(&[1.0], vec![cand("a", vec![1.0])], 0).is_empty());
    }
}
