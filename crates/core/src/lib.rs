pub mod chat;
pub mod chunking;
pub mod config;
pub mod conversation;
pub mod embeddings;
pub mod error;
pub mod experts;
pub mod ingest;
pub mod models;
pub mod retrieval;
pub mod similarity;
pub mod stores;
pub mod traits;
pub mod vector;

pub use chat::{ChatProvider, ChatProviderFactory, GeminiChat, OpenAiChat, RemoteChatProviders, SamplingParams};
pub use chunking::{ChunkingConfig, TextChunker};
pub use config::{Credentials, RetrievalConfig, RetrievalConfigBuilder, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_TOP_K};
pub use conversation::{assemble_messages, context_message, ChatReply, ChatTurnService};
pub use embeddings::{EmbeddingProvider, GeminiEmbedder, HashingEmbedder, OpenAiEmbedder};
pub use error::{RagError, Result};
pub use experts::{ExpertRepository, InMemoryExpertRepository, JsonExpertRepository};
pub use ingest::{
    discover_text_files, ingest_path, read_text_file, IngestedFile, IngestionReport, SkippedFile,
};
pub use models::{
    ChatMessage, ChatRole, Chunk, Document, Expert, ModelProvider, NewChunk, RetrievedChunk,
};
pub use retrieval::RetrievalService;
pub use similarity::{cosine_similarity, rank_top_k, Scored};
#[cfg(feature = "pgvector")]
pub use stores::PgVectorChunkStore;
pub use stores::{InMemoryChunkStore, SqliteChunkStore};
pub use traits::ChunkStore;
pub use vector::{format_vector_literal, parse_vector_literal};
