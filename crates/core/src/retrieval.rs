//! Document ingest and per-turn context retrieval for an expert.
//!
//! Ingest runs chunk → embed → persist under one deadline. Nothing is written
//! until every chunk has its embedding, and the write itself is one atomic
//! store call, so a failed or timed-out ingest leaves no document or chunk
//! rows behind.

use crate::chunking::TextChunker;
use crate::config::RetrievalConfig;
use crate::embeddings::{ensure_embedding, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::models::{Document, NewChunk, RetrievedChunk};
use crate::traits::ChunkStore;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info};

pub struct RetrievalService {
    config: RetrievalConfig,
    chunker: TextChunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn ChunkStore>,
}

impl RetrievalService {
    /// Wires a chunker, an embedding provider and a store.
    ///
    /// # Errors
    ///
    /// [`RagError::Config`] for an invalid chunking window and
    /// [`RagError::Dimension`] when the provider or the store disagree with
    /// `config.embedding_dimensions`.
    pub fn new(
        config: RetrievalConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn ChunkStore>,
    ) -> Result<Self> {
        let chunker = TextChunker::new(config.chunking)?;

        for actual in [embedder.dimensions(), store.dimensions()] {
            if actual != config.embedding_dimensions {
                return Err(RagError::Dimension {
                    expected: config.embedding_dimensions,
                    actual,
                });
            }
        }

        Ok(Self {
            config,
            chunker,
            embedder,
            store,
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Chunks, embeds and stores `content` as a new document of `expert_id`,
    /// returning the document id.
    ///
    /// Any failure is reported as [`RagError::Ingest`] wrapping the cause.
    /// The deadline covers the whole chunk, embed and persist sequence; the
    /// write is a single atomic [`ChunkStore::persist_document`] call, so an
    /// expired deadline leaves nothing behind.
    pub async fn ingest_document(
        &self,
        expert_id: &str,
        filename: &str,
        content: &str,
    ) -> Result<String> {
        let document = Document::new(expert_id, filename, content);
        debug!(expert_id, filename, document_id = %document.id, "ingesting document");

        let deadline = self.config.deadline;
        let outcome = timeout(deadline, self.chunk_embed_persist(&document))
            .await
            .unwrap_or_else(|_| Err(RagError::Timeout(deadline)));

        match outcome {
            Ok(chunk_count) => {
                info!(
                    expert_id,
                    filename,
                    document_id = %document.id,
                    chunk_count,
                    "ingested document"
                );
                Ok(document.id)
            }
            Err(cause) => {
                error!(expert_id, filename, error = %cause, "ingest failed");
                Err(RagError::ingest(filename, cause))
            }
        }
    }

    async fn chunk_embed_persist(&self, document: &Document) -> Result<usize> {
        let chunks = self.prepare_chunks(&document.content).await?;
        self.store.persist_document(document, &chunks).await?;
        Ok(chunks.len())
    }

    async fn prepare_chunks(&self, content: &str) -> Result<Vec<NewChunk>> {
        let pieces = self.chunker.split(content);
        let provider = self.embedder.name();
        let dimensions = self.config.embedding_dimensions;

        // `buffered` yields batches in input order regardless of completion order.
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(pieces.chunks(self.config.embed_batch_size))
            .map(|group| async move {
                let texts: Vec<&str> = group.iter().map(String::as_str).collect();
                let embeddings = self.embedder.embed_batch(&texts).await?;
                if embeddings.len() != texts.len() {
                    return Err(RagError::provider(
                        provider,
                        format!(
                            "returned {} embeddings for {} inputs",
                            embeddings.len(),
                            texts.len()
                        ),
                    ));
                }
                embeddings
                    .into_iter()
                    .map(|embedding| ensure_embedding(provider, dimensions, embedding))
                    .collect::<Result<Vec<_>>>()
            })
            .buffered(self.config.embed_concurrency)
            .try_collect()
            .await?;

        Ok(pieces
            .into_iter()
            .zip(batches.into_iter().flatten())
            .map(|(content, embedding)| NewChunk { content, embedding })
            .collect())
    }

    /// Ranked chunks of `expert_id`'s documents most similar to `query`.
    ///
    /// An expert without documents (or a blank query) yields an empty list.
    /// Provider failures and deadline expiry are returned as errors, never
    /// as an empty list.
    pub async fn retrieve_context(
        &self,
        expert_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() {
            debug!(expert_id, "blank query, nothing to retrieve");
            return Ok(Vec::new());
        }

        let search = async {
            let embedding = self.embedder.embed(query).await?;
            let embedding =
                ensure_embedding(self.embedder.name(), self.config.embedding_dimensions, embedding)?;
            self.store
                .similarity_search(expert_id, &embedding, limit)
                .await
        };

        let results = timeout(self.config.deadline, search)
            .await
            .map_err(|_| RagError::Timeout(self.config.deadline))??;

        debug!(expert_id, limit, hits = results.len(), "retrieved context");
        Ok(results)
    }

    /// Deletes one document and its chunks.
    pub async fn remove_document(&self, document_id: &str) -> Result<bool> {
        let removed = self.store.delete_document(document_id).await?;
        info!(document_id, removed, "removed document");
        Ok(removed)
    }

    /// Deletes every document of an expert, e.g. when the expert is deleted.
    pub async fn forget_expert(&self, expert_id: &str) -> Result<usize> {
        let removed = self.store.delete_expert_documents(expert_id).await?;
        info!(expert_id, removed, "removed expert documents");
        Ok(removed)
    }
}
