//! Retrieval pipeline configuration and provider credentials.

use crate::chunking::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::models::ModelProvider;
use std::time::Duration;

pub const DEFAULT_TOP_K: usize = 5;

/// Dimensionality of `text-embedding-ada-002`.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1_536;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub embedding_dimensions: usize,
    /// Maximum number of embedding requests in flight during one ingest.
    pub embed_concurrency: usize,
    /// Chunks sent per [`embed_batch`](crate::EmbeddingProvider::embed_batch) call.
    pub embed_batch_size: usize,
    pub deadline: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            top_k: DEFAULT_TOP_K,
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            embed_concurrency: 4,
            embed_batch_size: 16,
            deadline: Duration::from_secs(30),
        }
    }
}

impl RetrievalConfig {
    pub fn builder() -> RetrievalConfigBuilder {
        RetrievalConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalConfigBuilder {
    config: RetrievalConfig,
}

impl RetrievalConfigBuilder {
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunking.chunk_size = size;
        self
    }

    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunking.chunk_overlap = overlap;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.config.top_k = top_k;
        self
    }

    pub fn embedding_dimensions(mut self, dimensions: usize) -> Self {
        self.config.embedding_dimensions = dimensions;
        self
    }

    pub fn embed_concurrency(mut self, concurrency: usize) -> Self {
        self.config.embed_concurrency = concurrency;
        self
    }

    pub fn embed_batch_size(mut self, batch_size: usize) -> Self {
        self.config.embed_batch_size = batch_size;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = deadline;
        self
    }

    /// Validates the assembled configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] when the chunking window is invalid or any
    /// of `top_k`, `embedding_dimensions`, `embed_concurrency` or
    /// `embed_batch_size` is zero.
    pub fn build(self) -> Result<RetrievalConfig> {
        self.config.chunking.validate()?;
        if self.config.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".to_string()));
        }
        if self.config.embedding_dimensions == 0 {
            return Err(RagError::Config(
                "embedding_dimensions must be greater than zero".to_string(),
            ));
        }
        if self.config.embed_concurrency == 0 {
            return Err(RagError::Config(
                "embed_concurrency must be greater than zero".to_string(),
            ));
        }
        if self.config.embed_batch_size == 0 {
            return Err(RagError::Config(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(self.config)
    }
}

/// API keys for the supported providers.
#[derive(Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "***"))
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|value| !value.trim().is_empty());
        Self {
            openai_api_key: read("OPENAI_API_KEY"),
            gemini_api_key: read("GEMINI_API_KEY"),
        }
    }

    pub fn key_for(&self, provider: ModelProvider) -> Result<&str> {
        let key = match provider {
            ModelProvider::OpenAi => self.openai_api_key.as_deref(),
            ModelProvider::Google => self.gemini_api_key.as_deref(),
        };
        key.ok_or_else(|| RagError::Config(format!("API key not found for {provider}")))
    }
}
