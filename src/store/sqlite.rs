//! SQLite-backed [`VectorStore`].
//!
//! Vectors live in the `document_chunks.embedding` BLOB column as
//! little-endian `f32`s. The document upsert and chunk replacement share one
//! transaction, so a concurrent search sees either the previous chunk set or
//! the new one, and a failed write leaves no half-created document behind.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Result, SupportError};
use crate::models::{Chunk, Document, ScoredChunk};

use super::{check_chunk_batch, rank_candidates, Candidate, DocumentInfo, VectorStore};

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_document(row: &SqliteRow) -> Document {
    Document {
        file_id: row.get("file_id"),
        file_name: row.get("file_name"),
        file_type: row.get("file_type"),
        content_hash: row.get("content_hash"),
        uploaded_at: row.get("uploaded_at"),
        total_chunks: row.get("total_chunks"),
    }
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let start: i64 = row.get("start_offset");
    let end: i64 = row.get("end_offset");
    Chunk {
        chunk_id: row.get("chunk_id"),
        file_id: row.get("file_id"),
        file_name: row.get("file_name"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        start_offset: start.max(0) as usize,
        end_offset: end.max(0) as usize,
    }
}

/// Delete-then-insert the chunk set of `file_id` inside `tx`.
async fn write_chunks(
    tx: &mut Transaction<'_, Sqlite>,
    file_id: &str,
    chunks: &[Chunk],
    embeddings: &[Option<Vec<f32>>],
) -> Result<()> {
    sqlx::query("DELETE FROM document_chunks WHERE file_id = ?")
        .bind(file_id)
        .execute(&mut **tx)
        .await?;

    for (chunk, embedding) in chunks.iter().zip(embeddings) {
        let blob = embedding.as_deref().map(vec_to_blob);
        sqlx::query(
            r#"
            INSERT INTO document_chunks
                (chunk_id, file_id, file_name, chunk_index, text, start_offset, end_offset, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.chunk_id)
        .bind(&chunk.file_id)
        .bind(&chunk.file_name)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(chunk.start_offset as i64)
        .bind(chunk.end_offset as i64)
        .bind(blob)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn replace_document(
        &self,
        info: DocumentInfo<'_>,
        chunks: &[Chunk],
        embeddings: &[Option<Vec<f32>>],
    ) -> Result<Document> {
        check_chunk_batch(info.file_id, chunks, embeddings)?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (file_id, file_name, file_type, content_hash, uploaded_at, total_chunks)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_id) DO UPDATE SET
                file_name = excluded.file_name,
                file_type = excluded.file_type,
                content_hash = excluded.content_hash,
                uploaded_at = excluded.uploaded_at,
                total_chunks = excluded.total_chunks
            "#,
        )
        .bind(info.file_id)
        .bind(info.file_name)
        .bind(info.file_type)
        .bind(info.content_hash)
        .bind(now)
        .bind(chunks.len() as i64)
        .execute(&mut *tx)
        .await?;

        write_chunks(&mut tx, info.file_id, chunks, embeddings).await?;

        // Dropping `tx` on any `?` above rolls the whole unit back.
        tx.commit().await?;

        Ok(Document {
            file_id: info.file_id.to_string(),
            file_name: info.file_name.to_string(),
            file_type: info.file_type.to_string(),
            content_hash: info.content_hash.to_string(),
            uploaded_at: now,
            total_chunks: chunks.len() as i64,
        })
    }

    async fn save_document(&self, info: DocumentInfo<'_>) -> Result<Document> {
        sqlx::query(
            r#"
            INSERT INTO documents (file_id, file_name, file_type, content_hash, uploaded_at, total_chunks)
            VALUES (?, ?, ?, ?, ?, 0)
            ON CONFLICT(file_id) DO UPDATE SET
                file_name = excluded.file_name,
                file_type = excluded.file_type,
                content_hash = excluded.content_hash,
                uploaded_at = excluded.uploaded_at
            "#,
        )
        .bind(info.file_id)
        .bind(info.file_name)
        .bind(info.file_type)
        .bind(info.content_hash)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        self.get_document(info.file_id)
            .await?
            .ok_or_else(|| SupportError::NotFound(info.file_id.to_string()))
    }

    async fn save_chunks(
        &self,
        file_id: &str,
        chunks: &[Chunk],
        embeddings: &[Option<Vec<f32>>],
    ) -> Result<usize> {
        check_chunk_batch(file_id, chunks, embeddings)?;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE documents SET total_chunks = ? WHERE file_id = ?")
            .bind(chunks.len() as i64)
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(SupportError::NotFound(file_id.to_string()));
        }
        write_chunks(&mut tx, file_id, chunks, embeddings).await?;

        tx.commit().await?;
        Ok(chunks.len())
    }

    async fn search_similar(
        &self,
        query: &[f32],
        top_k: usize,
        file_id: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = match file_id {
            Some(fid) => {
                sqlx::query(
                    r#"
                    SELECT chunk_id, file_id, file_name, chunk_index, text, embedding
                    FROM document_chunks
                    WHERE embedding IS NOT NULL AND file_id = ?
                    ORDER BY rowid
                    "#,
                )
                .bind(fid)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT chunk_id, file_id, file_name, chunk_index, text, embedding
                    FROM document_chunks
                    WHERE embedding IS NOT NULL
                    ORDER BY rowid
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let candidates = rows.iter().map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            Candidate {
                chunk_id: row.get("chunk_id"),
                file_id: row.get("file_id"),
                file_name: row.get("file_name"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                vector: blob_to_vec(&blob),
            }
        });

        Ok(rank_candidates(query, candidates, top_k))
    }

    async fn delete_document(&self, file_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE file_id = ?")
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_document(&self, file_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT file_id, file_name, file_type, content_hash, uploaded_at, total_chunks \
             FROM documents WHERE file_id = ?",
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT file_id, file_name, file_type, content_hash, uploaded_at, total_chunks \
             FROM documents ORDER BY uploaded_at DESC, file_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn get_chunks(&self, file_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT chunk_id, file_id, file_name, chunk_index, text, start_offset, end_offset \
             FROM document_chunks WHERE file_id = ? ORDER BY chunk_index",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use crate::models::chunk_id;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteVectorStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        SqliteVectorStore::new(pool)
    }

    fn info<'a>(file_id: &'a str, file_name: &'a str) -> DocumentInfo<'a> {
        DocumentInfo {
            file_id,
            file_name,
            file_type: "txt",
            content_hash: "h",
        }
    }

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

    async fn break_chunk_inserts(store: &SqliteVectorStore) {
        sqlx::query(
            "CREATE TRIGGER reject_chunks BEFORE INSERT ON document_chunks \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn replace_writes_row_chunks_and_vectors() {
        let store = store().await;
        let doc = store
            .replace_document(
                info("a", "a.txt"),
                &[chunk("a", 0, "apples"), chunk("a", 1, "bananas")],
                &[Some(vec![1.0, 0.0]), None],
            )
            .await
            .unwrap();
        assert_eq!(doc.total_chunks, 2);
        assert_eq!(store.get_document("a").await.unwrap().unwrap(), doc);
        assert_eq!(store.get_chunks("a").await.unwrap().len(), 2);

        // The NULL-vector chunk never matches.
        let hits = store.search_similar(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "a_chunk_0");
    }

    #[tokio::test]
    async fn failed_chunk_write_leaves_no_new_document() {
        let store = store().await;
        break_chunk_inserts(&store).await;

        let result = store
            .replace_document(info("a", "a.txt"), &[chunk("a", 0, "x")], &[None])
            .await;
        assert!(result.is_err());
        assert!(store.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_replacement_keeps_previous_version() {
        let store = store().await;
        let before = store
            .replace_document(info("a", "old.txt"), &[chunk("a", 0, "old")], &[None])
            .await
            .unwrap();
        break_chunk_inserts(&store).await;

        let result = store
            .replace_document(info("a", "new.txt"), &[chunk("a", 0, "new")], &[None])
            .await;
        assert!(result.is_err());
        assert_eq!(store.get_document("a").await.unwrap().unwrap(), before);
        let chunks = store.get_chunks("a").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "old");
    }

    #[tokio::test]
    async fn mismatched_batch_is_rejected_before_writing() {
        let store = store().await;
        let err = store
            .replace_document(info("a", "a.txt"), &[chunk("a", 0, "x")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SupportError::InvalidRequest(_)));
        assert!(store.get_document("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_chunks_requires_existing_document() {
        let store = store().await;
        let err = store
            .save_chunks("ghost", &[chunk("ghost", 0, "x")], &[None])
            .await
            .unwrap_err();
        assert!(matches!(err, SupportError::NotFound(_)));

        store.save_document(info("a", "a.txt")).await.unwrap();
        assert_eq!(
            store
                .save_chunks("a", &[chunk("a", 0, "x"), chunk("a", 1, "y")], &[None, None])
                .await
                .unwrap(),
            2
        );
        assert_eq!(store.get_document("a").await.unwrap().unwrap().total_chunks, 2);

        // A later upsert of the row alone keeps the count.
        store.save_document(info("a", "renamed.txt")).await.unwrap();
        let doc = store.get_document("a").await.unwrap().unwrap();
        assert_eq!(doc.file_name, "renamed.txt");
        assert_eq!(doc.total_chunks, 2);
    }
}
