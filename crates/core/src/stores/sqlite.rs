//! SQLite chunk store.
//!
//! Embeddings are kept as `[f1,...,fD]` literals in a TEXT column and scored
//! in process. Chunk rows reference their document with `ON DELETE CASCADE`,
//! and multi-row writes run inside one transaction.

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document, NewChunk, RetrievedChunk};
use crate::similarity::{cosine_similarity, rank_top_k, Scored};
use crate::traits::{check_dimensions, document_not_found, ChunkStore};
use crate::vector::{format_vector_literal, parse_vector_literal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const BACKEND: &str = "sqlite";

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        expert_id TEXT NOT NULL,
        filename TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_documents_expert ON documents(expert_id);

    CREATE TABLE IF NOT EXISTS document_chunks (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        content TEXT NOT NULL,
        embedding TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_document ON document_chunks(document_id);
";

fn sql_error(error: rusqlite::Error) -> RagError {
    RagError::store(BACKEND, error.to_string())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| RagError::store(BACKEND, format!("bad timestamp {value:?}: {error}")))
}

pub struct SqliteChunkStore {
    dimensions: usize,
    conn: Mutex<Connection>,
}

impl SqliteChunkStore {
    /// Opens (or creates) a database file. A database created for another
    /// embedding size is refused with [`RagError::Dimension`].
    pub fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(sql_error)?;
        Self::initialize(conn, dimensions)
    }

    pub fn open_in_memory(dimensions: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_error)?;
        Self::initialize(conn, dimensions)
    }

    fn initialize(conn: Connection, dimensions: usize) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(sql_error)?;

        let recorded: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_error)?;

        match recorded {
            Some(value) => {
                let stored = value.parse::<usize>().map_err(|error| {
                    RagError::store(BACKEND, format!("bad dimensions entry {value:?}: {error}"))
                })?;
                if stored != dimensions {
                    return Err(RagError::Dimension {
                        expected: stored,
                        actual: dimensions,
                    });
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES ('dimensions', ?1)",
                    params![dimensions.to_string()],
                )
                .map_err(sql_error)?;
            }
        }

        debug!(dimensions, "sqlite chunk store ready");
        Ok(Self {
            dimensions,
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|error| RagError::store(BACKEND, format!("connection lock poisoned: {error}")))
    }

    fn check_chunks(&self, chunks: &[NewChunk]) -> Result<()> {
        chunks
            .iter()
            .try_for_each(|chunk| check_dimensions(self.dimensions, &chunk.embedding))
    }
}

fn insert_document_row(tx: &Transaction<'_>, document: &Document) -> Result<()> {
    tx.execute(
        "INSERT INTO documents (id, expert_id, filename, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            document.id,
            document.expert_id,
            document.filename,
            document.content,
            document.created_at.to_rfc3339(),
        ],
    )
    .map_err(sql_error)?;
    Ok(())
}

fn append_chunk_rows(tx: &Transaction<'_>, document_id: &str, chunks: &[NewChunk]) -> Result<Vec<String>> {
    let exists: Option<i64> = tx
        .query_row("SELECT 1 FROM documents WHERE id = ?1", params![document_id], |row| row.get(0))
        .optional()
        .map_err(sql_error)?;
    if exists.is_none() {
        return Err(document_not_found(document_id));
    }

    let next_position: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM document_chunks WHERE document_id = ?1",
            params![document_id],
            |row| row.get(0),
        )
        .map_err(sql_error)?;

    let created_at = Utc::now().to_rfc3339();
    let mut statement = tx
        .prepare(
            "INSERT INTO document_chunks (id, document_id, position, content, embedding, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .map_err(sql_error)?;

    let mut ids = Vec::with_capacity(chunks.len());
    for (offset, chunk) in chunks.iter().enumerate() {
        let id = uuid::Uuid::new_v4().to_string();
        statement
            .execute(params![
                id,
                document_id,
                next_position + offset as i64,
                chunk.content,
                format_vector_literal(&chunk.embedding),
                created_at,
            ])
            .map_err(sql_error)?;
        ids.push(id);
    }
    Ok(ids)
}

fn read_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_document(raw: (String, String, String, String, String)) -> Result<Document> {
    let (id, expert_id, filename, content, created_at) = raw;
    Ok(Document {
        id,
        expert_id,
        filename,
        content,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn create_document(&self, document: &Document) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(sql_error)?;
        insert_document_row(&tx, document)?;
        tx.commit().map_err(sql_error)
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT id, expert_id, filename, content, created_at FROM documents WHERE id = ?1",
                params![document_id],
                read_document,
            )
            .optional()
            .map_err(sql_error)?;
        raw.map(into_document).transpose()
    }

    async fn list_documents(&self, expert_id: &str) -> Result<Vec<Document>> {
        let conn = self.lock()?;
        let mut statement = conn
            .prepare(
                "SELECT id, expert_id, filename, content, created_at FROM documents \
                 WHERE expert_id = ?1 ORDER BY rowid",
            )
            .map_err(sql_error)?;
        let rows = statement
            .query_map(params![expert_id], read_document)
            .map_err(sql_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error)?;
        rows.into_iter().map(into_document).collect()
    }

    async fn insert(&self, document_id: &str, content: &str, embedding: &[f32]) -> Result<String> {
        let ids = self
            .bulk_insert(document_id, &[NewChunk::new(content, embedding.to_vec())])
            .await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| RagError::store(BACKEND, "insert produced no chunk id"))
    }

    async fn bulk_insert(&self, document_id: &str, chunks: &[NewChunk]) -> Result<Vec<String>> {
        self.check_chunks(chunks)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(sql_error)?;
        let ids = append_chunk_rows(&tx, document_id, chunks)?;
        tx.commit().map_err(sql_error)?;
        Ok(ids)
    }

    async fn persist_document(&self, document: &Document, chunks: &[NewChunk]) -> Result<Vec<String>> {
        self.check_chunks(chunks)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(sql_error)?;
        insert_document_row(&tx, document)?;
        let ids = append_chunk_rows(&tx, &document.id, chunks)?;
        tx.commit().map_err(sql_error)?;
        debug!(document_id = %document.id, chunk_count = ids.len(), "persisted document");
        Ok(ids)
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        let mut statement = conn
            .prepare(
                "SELECT id, document_id, position, content, embedding, created_at \
                 FROM document_chunks WHERE document_id = ?1 ORDER BY position, seq",
            )
            .map_err(sql_error)?;
        let rows = statement
            .query_map(params![document_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(sql_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error)?;

        rows.into_iter()
            .map(|(id, document_id, position, content, embedding, created_at)| {
                Ok(Chunk {
                    id,
                    document_id,
                    position: u32::try_from(position).map_err(|_| {
                        RagError::store(BACKEND, format!("chunk position {position} out of range"))
                    })?,
                    content,
                    embedding: parse_vector_literal(&embedding)?,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }

    async fn similarity_search(
        &self,
        expert_id: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        check_dimensions(self.dimensions, query_embedding)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut statement = conn
            .prepare(
                "SELECT c.seq, c.id, c.document_id, c.content, c.embedding \
                 FROM document_chunks c JOIN documents d ON d.id = c.document_id \
                 WHERE d.expert_id = ?1 ORDER BY c.seq",
            )
            .map_err(sql_error)?;
        let rows = statement
            .query_map(params![expert_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(sql_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for (sequence, chunk_id, document_id, content, literal) in rows {
            let embedding = parse_vector_literal(&literal)?;
            check_dimensions(self.dimensions, &embedding)?;
            candidates.push(Scored {
                sequence: sequence as u64,
                score: cosine_similarity(query_embedding, &embedding)?,
                item: RetrievedChunk {
                    chunk_id,
                    document_id,
                    content,
                    similarity: 0.0,
                },
            });
        }

        Ok(rank_top_k(candidates, limit)
            .into_iter()
            .map(|scored| RetrievedChunk {
                similarity: scored.score,
                ..scored.item
            })
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![document_id])
            .map_err(sql_error)?;
        Ok(removed > 0)
    }

    async fn delete_expert_documents(&self, expert_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM documents WHERE expert_id = ?1", params![expert_id])
            .map_err(sql_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embeddings_round_trip_through_the_table() {
        let store = SqliteChunkStore::open_in_memory(3).unwrap();
        let doc = Document::new("e1", "a.txt", "alpha");
        let embedding = vec![0.1f32, -2.5e-8, 1.0 / 3.0];
        store
            .persist_document(&doc, &[NewChunk::new("alpha", embedding.clone())])
            .await
            .unwrap();

        let chunks = store.document_chunks(&doc.id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].embedding, embedding);
        assert_eq!(chunks[0].position, 0);
    }

    #[tokio::test]
    async fn insert_into_missing_document_is_not_found() {
        let store = SqliteChunkStore::open_in_memory(2).unwrap();
        let result = store.insert("nope", "text", &[1.0, 0.0]).await;
        assert!(matches!(result, Err(RagError::NotFound { .. })));
    }

    #[tokio::test]
    async fn failed_persist_leaves_no_rows() {
        let store = SqliteChunkStore::open_in_memory(2).unwrap();
        let doc = Document::new("e1", "a.txt", "alpha");
        store.create_document(&doc).await.unwrap();

        // Same id again: the document insert fails inside the transaction.
        let duplicate = Document::new("e1", "b.txt", "beta");
        let duplicate = Document { id: doc.id.clone(), ..duplicate };
        let result = store
            .persist_document(&duplicate, &[NewChunk::new("beta", vec![1.0, 0.0])])
            .await;
        assert!(result.is_err());
        assert!(store.document_chunks(&doc.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_document_cascades() {
        let store = SqliteChunkStore::open_in_memory(2).unwrap();
        let doc = Document::new("e1", "a.txt", "alpha");
        store
            .persist_document(
                &doc,
                &[
                    NewChunk::new("one", vec![1.0, 0.0]),
                    NewChunk::new("two", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        assert!(store.delete_document(&doc.id).await.unwrap());
        assert!(!store.delete_document(&doc.id).await.unwrap());
        assert!(store.document_chunks(&doc.id).await.unwrap().is_empty());
        assert!(store
            .similarity_search("e1", &[1.0, 0.0], 5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn search_ranks_and_breaks_ties_by_insertion() {
        let store = SqliteChunkStore::open_in_memory(2).unwrap();
        let doc = Document::new("e1", "a.txt", "alpha");
        store
            .persist_document(
                &doc,
                &[
                    NewChunk::new("orthogonal", vec![0.0, 1.0]),
                    NewChunk::new("tie-a", vec![1.0, 0.0]),
                    NewChunk::new("tie-b", vec![4.0, 0.0]),
                ],
            )
            .await
            .unwrap();
        store
            .persist_document(
                &Document::new("e2", "b.txt", "beta"),
                &[NewChunk::new("other expert", vec![1.0, 0.0])],
            )
            .await
            .unwrap();

        let hits = store.similarity_search("e1", &[1.0, 0.0], 5).await.unwrap();
        let contents: Vec<_> = hits.iter().map(|hit| hit.content.as_str()).collect();
        assert_eq!(contents, vec!["tie-a", "tie-b", "orthogonal"]);
        assert_eq!(hits[2].similarity, 0.0);
    }

    #[test]
    fn reopening_with_other_dimensions_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rag.db");
        drop(SqliteChunkStore::open(&path, 8).unwrap());

        assert!(SqliteChunkStore::open(&path, 8).is_ok());
        assert!(matches!(
            SqliteChunkStore::open(&path, 16),
            Err(RagError::Dimension {
                expected: 8,
                actual: 16
            })
        ));
    }

    #[tokio::test]
    async fn documents_are_listed_per_expert() {
        let store = SqliteChunkStore::open_in_memory(1).unwrap();
        store.create_document(&Document::new("e1", "a.txt", "a")).await.unwrap();
        store.create_document(&Document::new("e1", "b.txt", "b")).await.unwrap();
        store.create_document(&Document::new("e2", "c.txt", "c")).await.unwrap();

        let names: Vec<_> = store
            .list_documents("e1")
            .await
            .unwrap()
            .into_iter()
            .map(|document| document.filename)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(store.delete_expert_documents("e1").await.unwrap(), 2);
    }
}
