use crate::error::{RagError, Result};
use crate::models::{Chunk, Document, NewChunk, RetrievedChunk};
use async_trait::async_trait;

/// Durable home of documents and their embedded chunks.
///
/// Every stored embedding has [`dimensions`](ChunkStore::dimensions) values;
/// writes and queries with another length fail with [`RagError::Dimension`].
#[async_trait]
pub trait ChunkStore: Send + Sync {
    fn backend(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn create_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>>;

    async fn list_documents(&self, expert_id: &str) -> Result<Vec<Document>>;

    /// Appends one chunk; [`RagError::NotFound`] if the document is unknown.
    async fn insert(&self, document_id: &str, content: &str, embedding: &[f32]) -> Result<String>;

    /// Appends a document's chunks in order. Either all of them are stored
    /// or none are.
    async fn bulk_insert(&self, document_id: &str, chunks: &[NewChunk]) -> Result<Vec<String>>;

    /// Stores a new document together with its chunks as one unit: after
    /// an error neither the document nor any of its chunks is visible.
    async fn persist_document(&self, document: &Document, chunks: &[NewChunk]) -> Result<Vec<String>>;

    /// Chunks of one document in extraction order.
    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Top `limit` chunks of the expert's documents by descending cosine
    /// similarity, earlier insertion first on ties. Empty when the expert has
    /// no chunks or `limit` is zero.
    async fn similarity_search(
        &self,
        expert_id: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>>;

    /// Removes a document and its chunks. Returns whether it existed.
    async fn delete_document(&self, document_id: &str) -> Result<bool>;

    /// Removes every document of an expert and their chunks. Returns the
    /// number of documents removed.
    async fn delete_expert_documents(&self, expert_id: &str) -> Result<usize>;
}

pub(crate) fn check_dimensions(expected: usize, embedding: &[f32]) -> Result<()> {
    if embedding.len() != expected {
        return Err(RagError::Dimension {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(())
}

pub(crate) fn document_not_found(document_id: &str) -> RagError {
    RagError::NotFound {
        entity: "document",
        id: document_id.to_string(),
    }
}
