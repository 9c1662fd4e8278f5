//! PostgreSQL + pgvector chunk store (cargo feature `pgvector`).
//!
//! Vectors travel as bound `[f1,...,fD]` literals cast with `::vector`; the
//! query text never contains caller data. Ranking uses the `<=>` cosine
//! distance operator.

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document, NewChunk, RetrievedChunk};
use crate::traits::{check_dimensions, document_not_found, ChunkStore};
use crate::vector::{format_vector_literal, parse_vector_literal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use tracing::debug;

const BACKEND: &str = "pgvector";

fn db_error(error: sqlx::Error) -> RagError {
    RagError::store(BACKEND, error.to_string())
}

pub struct PgVectorChunkStore {
    pool: PgPool,
    dimensions: usize,
}

impl PgVectorChunkStore {
    pub async fn connect(database_url: &str, dimensions: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(db_error)?;
        Ok(Self::from_pool(pool, dimensions))
    }

    pub fn from_pool(pool: PgPool, dimensions: usize) -> Self {
        Self { pool, dimensions }
    }

    /// Creates the extension, tables and index when missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            "CREATE TABLE IF NOT EXISTS documents (\
                id TEXT PRIMARY KEY, \
                expert_id TEXT NOT NULL, \
                filename TEXT NOT NULL, \
                content TEXT NOT NULL, \
                created_at TIMESTAMPTZ NOT NULL DEFAULT now())"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS idx_documents_expert ON documents (expert_id)".to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS document_chunks (\
                    seq BIGSERIAL NOT NULL, \
                    id TEXT PRIMARY KEY, \
                    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE, \
                    position INTEGER NOT NULL, \
                    content TEXT NOT NULL, \
                    embedding vector({}) NOT NULL, \
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now())",
                self.dimensions
            ),
            "CREATE INDEX IF NOT EXISTS idx_chunks_document ON document_chunks (document_id)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS idx_chunks_embedding ON document_chunks \
             USING hnsw (embedding vector_cosine_ops)"
                .to_string(),
        ];

        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        }

        debug!(dimensions = self.dimensions, "pgvector schema ready");
        Ok(())
    }

    fn check_chunks(&self, chunks: &[NewChunk]) -> Result<()> {
        chunks
            .iter()
            .try_for_each(|chunk| check_dimensions(self.dimensions, &chunk.embedding))
    }
}

async fn insert_document_row(tx: &mut Transaction<'_, Postgres>, document: &Document) -> Result<()> {
    sqlx::query(
        "INSERT INTO documents (id, expert_id, filename, content, created_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&document.id)
    .bind(&document.expert_id)
    .bind(&document.filename)
    .bind(&document.content)
    .bind(document.created_at)
    .execute(&mut **tx)
    .await
    .map_err(db_error)?;
    Ok(())
}

async fn append_chunk_rows(
    tx: &mut Transaction<'_, Postgres>,
    document_id: &str,
    chunks: &[NewChunk],
) -> Result<Vec<String>> {
    let next_position: Option<i32> = sqlx::query(
        "SELECT (SELECT COALESCE(MAX(position) + 1, 0) FROM document_chunks WHERE document_id = $1) \
         FROM documents WHERE id = $1 FOR UPDATE",
    )
    .bind(document_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_error)?
    .map(|row| row.try_get::<i32, _>(0))
    .transpose()
    .map_err(db_error)?;

    let next_position = next_position.ok_or_else(|| document_not_found(document_id))?;

    let mut ids = Vec::with_capacity(chunks.len());
    for (offset, chunk) in chunks.iter().enumerate() {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO document_chunks (id, document_id, position, content, embedding) \
             VALUES ($1, $2, $3, $4, $5::vector)",
        )
        .bind(&id)
        .bind(document_id)
        .bind(next_position + offset as i32)
        .bind(&chunk.content)
        .bind(format_vector_literal(&chunk.embedding))
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;
        ids.push(id);
    }
    Ok(ids)
}

fn document_from_row(row: &sqlx::postgres::PgRow) -> Result<Document> {
    Ok(Document {
        id: row.try_get("id").map_err(db_error)?,
        expert_id: row.try_get("expert_id").map_err(db_error)?,
        filename: row.try_get("filename").map_err(db_error)?,
        content: row.try_get("content").map_err(db_error)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(db_error)?,
    })
}

#[async_trait]
impl ChunkStore for PgVectorChunkStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn create_document(&self, document: &Document) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        insert_document_row(&mut tx, document).await?;
        tx.commit().await.map_err(db_error)
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, expert_id, filename, content, created_at FROM documents WHERE id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self, expert_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, expert_id, filename, content, created_at FROM documents \
             WHERE expert_id = $1 ORDER BY created_at, id",
        )
        .bind(expert_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(document_from_row).collect()
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
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let ids = append_chunk_rows(&mut tx, document_id, chunks).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(ids)
    }

    async fn persist_document(&self, document: &Document, chunks: &[NewChunk]) -> Result<Vec<String>> {
        self.check_chunks(chunks)?;
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        insert_document_row(&mut tx, document).await?;
        let ids = append_chunk_rows(&mut tx, &document.id, chunks).await?;
        tx.commit().await.map_err(db_error)?;
        debug!(document_id = %document.id, chunk_count = ids.len(), "persisted document");
        Ok(ids)
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, document_id, position, content, embedding::text AS embedding, created_at \
             FROM document_chunks WHERE document_id = $1 ORDER BY position, seq",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                let position: i32 = row.try_get("position").map_err(db_error)?;
                let literal: String = row.try_get("embedding").map_err(db_error)?;
                Ok(Chunk {
                    id: row.try_get("id").map_err(db_error)?,
                    document_id: row.try_get("document_id").map_err(db_error)?,
                    position: u32::try_from(position).map_err(|_| {
                        RagError::store(BACKEND, format!("chunk position {position} out of range"))
                    })?,
                    content: row.try_get("content").map_err(db_error)?,
                    embedding: parse_vector_literal(&literal)?,
                    created_at: row.try_get("created_at").map_err(db_error)?,
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

        // `<=>` is NaN against a zero vector; those pairs score 0.
        let rows = sqlx::query(
            "SELECT c.id, c.document_id, c.content, \
                    CASE WHEN vector_norm(c.embedding) = 0 OR vector_norm($2::vector) = 0 THEN 0 \
                         ELSE 1 - (c.embedding <=> $2::vector) END::float8 AS similarity \
             FROM document_chunks c \
             JOIN documents d ON d.id = c.document_id \
             WHERE d.expert_id = $1 \
             ORDER BY similarity DESC, c.seq ASC \
             LIMIT $3",
        )
        .bind(expert_id)
        .bind(format_vector_literal(query_embedding))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                let similarity: f64 = row.try_get("similarity").map_err(db_error)?;
                Ok(RetrievedChunk {
                    chunk_id: row.try_get("id").map_err(db_error)?,
                    document_id: row.try_get("document_id").map_err(db_error)?,
                    content: row.try_get("content").map_err(db_error)?,
                    similarity: similarity as f32,
                })
            })
            .collect()
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expert_documents(&self, expert_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM documents WHERE expert_id = $1")
            .bind(expert_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() as usize)
    }
}
