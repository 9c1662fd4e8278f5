//! In-process chunk store behind a `tokio::sync::RwLock`.

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document, NewChunk, RetrievedChunk};
use crate::similarity::{cosine_similarity, rank_top_k, Scored};
use crate::traits::{check_dimensions, document_not_found, ChunkStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

const BACKEND: &str = "memory";

#[derive(Debug)]
struct StoredChunk {
    sequence: u64,
    chunk: Chunk,
}

#[derive(Debug, Default)]
struct State {
    documents: HashMap<String, Document>,
    document_order: Vec<String>,
    chunks: Vec<StoredChunk>,
    next_sequence: u64,
}

impl State {
    fn append(&mut self, document_id: &str, chunks: &[NewChunk]) -> Vec<String> {
        let mut position = self
            .chunks
            .iter()
            .filter(|stored| stored.chunk.document_id == document_id)
            .count() as u32;
        let now = Utc::now();

        chunks
            .iter()
            .map(|new_chunk| {
                let id = uuid::Uuid::new_v4().to_string();
                self.chunks.push(StoredChunk {
                    sequence: self.next_sequence,
                    chunk: Chunk {
                        id: id.clone(),
                        document_id: document_id.to_string(),
                        position,
                        content: new_chunk.content.clone(),
                        embedding: new_chunk.embedding.clone(),
                        created_at: now,
                    },
                });
                self.next_sequence += 1;
                position += 1;
                id
            })
            .collect()
    }

    fn remove_document(&mut self, document_id: &str) -> bool {
        if self.documents.remove(document_id).is_none() {
            return false;
        }
        self.document_order.retain(|id| id != document_id);
        self.chunks
            .retain(|stored| stored.chunk.document_id != document_id);
        true
    }
}

/// Chunk store kept entirely in memory; contents vanish with the process.
#[derive(Debug)]
pub struct InMemoryChunkStore {
    dimensions: usize,
    state: RwLock<State>,
}

impl InMemoryChunkStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            state: RwLock::new(State::default()),
        }
    }

    pub async fn chunk_count(&self) -> usize {
        self.state.read().await.chunks.len()
    }

    pub async fn document_count(&self) -> usize {
        self.state.read().await.documents.len()
    }

    fn check_chunks(&self, chunks: &[NewChunk]) -> Result<()> {
        chunks
            .iter()
            .try_for_each(|chunk| check_dimensions(self.dimensions, &chunk.embedding))
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn create_document(&self, document: &Document) -> Result<()> {
        let mut state = self.state.write().await;
        if state.documents.contains_key(&document.id) {
            return Err(RagError::store(
                BACKEND,
                format!("document {} already exists", document.id),
            ));
        }
        state.document_order.push(document.id.clone());
        state.documents.insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        Ok(self.state.read().await.documents.get(document_id).cloned())
    }

    async fn list_documents(&self, expert_id: &str) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        Ok(state
            .document_order
            .iter()
            .filter_map(|id| state.documents.get(id))
            .filter(|document| document.expert_id == expert_id)
            .cloned()
            .collect())
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
        let mut state = self.state.write().await;
        if !state.documents.contains_key(document_id) {
            return Err(document_not_found(document_id));
        }
        Ok(state.append(document_id, chunks))
    }

    async fn persist_document(&self, document: &Document, chunks: &[NewChunk]) -> Result<Vec<String>> {
        self.check_chunks(chunks)?;
        let mut state = self.state.write().await;
        if state.documents.contains_key(&document.id) {
            return Err(RagError::store(
                BACKEND,
                format!("document {} already exists", document.id),
            ));
        }
        state.document_order.push(document.id.clone());
        state.documents.insert(document.id.clone(), document.clone());
        Ok(state.append(&document.id, chunks))
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let state = self.state.read().await;
        Ok(state
            .chunks
            .iter()
            .filter(|stored| stored.chunk.document_id == document_id)
            .map(|stored| stored.chunk.clone())
            .collect())
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

        let state = self.state.read().await;
        let owned: HashSet<&str> = state
            .documents
            .values()
            .filter(|document| document.expert_id == expert_id)
            .map(|document| document.id.as_str())
            .collect();

        let mut candidates = Vec::new();
        for stored in &state.chunks {
            if !owned.contains(stored.chunk.document_id.as_str()) {
                continue;
            }
            candidates.push(Scored {
                sequence: stored.sequence,
                score: cosine_similarity(query_embedding, &stored.chunk.embedding)?,
                item: &stored.chunk,
            });
        }

        Ok(rank_top_k(candidates, limit)
            .into_iter()
            .map(|scored| RetrievedChunk {
                chunk_id: scored.item.id.clone(),
                document_id: scored.item.document_id.clone(),
                content: scored.item.content.clone(),
                similarity: scored.score,
            })
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        Ok(self.state.write().await.remove_document(document_id))
    }

    async fn delete_expert_documents(&self, expert_id: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let doomed: Vec<String> = state
            .documents
            .values()
            .filter(|document| document.expert_id == expert_id)
            .map(|document| document.id.clone())
            .collect();

        for document_id in &doomed {
            state.remove_document(document_id);
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(expert_id: &str, filename: &str) -> Document {
        Document::new(expert_id, filename, format!("content of {filename}"))
    }

    #[tokio::test]
    async fn insert_requires_existing_document() {
        let store = InMemoryChunkStore::new(2);
        let result = store.insert("missing", "text", &[1.0, 0.0]).await;
        assert!(matches!(result, Err(RagError::NotFound { .. })));
    }

    #[tokio::test]
    async fn wrong_dimension_fails_fast() {
        let store = InMemoryChunkStore::new(3);
        let doc = document("e1", "a.txt");
        store.create_document(&doc).await.unwrap();

        let insert = store.insert(&doc.id, "text", &[1.0, 0.0]).await;
        assert!(matches!(
            insert,
            Err(RagError::Dimension {
                expected: 3,
                actual: 2
            })
        ));

        let search = store.similarity_search("e1", &[1.0], 5).await;
        assert!(matches!(search, Err(RagError::Dimension { .. })));
    }

    #[tokio::test]
    async fn bulk_insert_is_all_or_nothing() {
        let store = InMemoryChunkStore::new(2);
        let doc = document("e1", "a.txt");
        store.create_document(&doc).await.unwrap();

        let chunks = vec![
            NewChunk::new("ok", vec![1.0, 0.0]),
            NewChunk::new("bad", vec![1.0]),
        ];
        assert!(store.bulk_insert(&doc.id, &chunks).await.is_err());
        assert_eq!(store.chunk_count().await, 0);
    }

    #[tokio::test]
    async fn search_is_scoped_to_expert_and_ranked() {
        let store = InMemoryChunkStore::new(2);
        let mine = document("e1", "mine.txt");
        let theirs = document("e2", "theirs.txt");
        store
            .persist_document(
                &mine,
                &[
                    NewChunk::new("far", vec![0.0, 1.0]),
                    NewChunk::new("near", vec![1.0, 0.1]),
                ],
            )
            .await
            .unwrap();
        store
            .persist_document(&theirs, &[NewChunk::new("exact", vec![1.0, 0.0])])
            .await
            .unwrap();

        let hits = store.similarity_search("e1", &[1.0, 0.0], 5).await.unwrap();
        let contents: Vec<_> = hits.iter().map(|hit| hit.content.as_str()).collect();
        assert_eq!(contents, vec!["near", "far"]);
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[tokio::test]
    async fn ties_return_earlier_insert_first() {
        let store = InMemoryChunkStore::new(2);
        let doc = document("e1", "a.txt");
        store
            .persist_document(
                &doc,
                &[
                    NewChunk::new("first", vec![2.0, 0.0]),
                    NewChunk::new("second", vec![1.0, 0.0]),
                    NewChunk::new("third", vec![3.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.similarity_search("e1", &[1.0, 0.0], 2).await.unwrap();
        let contents: Vec<_> = hits.iter().map(|hit| hit.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn unknown_expert_yields_empty_results() {
        let store = InMemoryChunkStore::new(2);
        let hits = store.similarity_search("nobody", &[1.0, 0.0], 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn zero_limit_returns_nothing() {
        let store = InMemoryChunkStore::new(2);
        store
            .persist_document(&document("e1", "a.txt"), &[NewChunk::new("a", vec![1.0, 0.0])])
            .await
            .unwrap();
        assert!(store
            .similarity_search("e1", &[1.0, 0.0], 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn deleting_expert_cascades_to_chunks() {
        let store = InMemoryChunkStore::new(2);
        let keep = document("e2", "keep.txt");
        store
            .persist_document(&document("e1", "a.txt"), &[NewChunk::new("a", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .persist_document(&document("e1", "b.txt"), &[NewChunk::new("b", vec![0.0, 1.0])])
            .await
            .unwrap();
        store
            .persist_document(&keep, &[NewChunk::new("k", vec![1.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(store.delete_expert_documents("e1").await.unwrap(), 2);
        assert_eq!(store.document_count().await, 1);
        assert_eq!(store.chunk_count().await, 1);
        assert_eq!(store.document_chunks(&keep.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chunk_positions_follow_extraction_order() {
        let store = InMemoryChunkStore::new(1);
        let doc = document("e1", "a.txt");
        store
            .persist_document(&doc, &[NewChunk::new("zero", vec![1.0]), NewChunk::new("one", vec![1.0])])
            .await
            .unwrap();
        store.insert(&doc.id, "two", &[1.0]).await.unwrap();

        let chunks = store.document_chunks(&doc.id).await.unwrap();
        let positions: Vec<_> = chunks.iter().map(|chunk| (chunk.position, chunk.content.as_str())).collect();
        assert_eq!(positions, vec![(0, "zero"), (1, "one"), (2, "two")]);
    }
}
