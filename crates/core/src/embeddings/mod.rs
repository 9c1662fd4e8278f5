//! Embedding providers: text in, fixed-length vector out.

mod gemini;
mod hashing;
mod openai;

pub use gemini::GeminiEmbedder;
pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;

use crate::error::{RagError, Result};
use async_trait::async_trait;

/// A remote or local model that turns text into a vector of
/// [`dimensions`](EmbeddingProvider::dimensions) floats.
///
/// Implementations must reject responses of the wrong length with
/// [`RagError::Provider`] rather than hand them on.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embeds several texts, preserving input order. Sequential unless the
    /// backend overrides it with a native batch call.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

/// Checks a provider response against the configured dimensionality.
pub(crate) fn ensure_embedding(
    provider: &str,
    expected: usize,
    embedding: Vec<f32>,
) -> Result<Vec<f32>> {
    if embedding.len() != expected {
        return Err(RagError::provider(
            provider,
            format!(
                "returned {} dimensions, expected {expected}",
                embedding.len()
            ),
        ));
    }
    if embedding.iter().any(|value| !value.is_finite()) {
        return Err(RagError::provider(provider, "returned non-finite values"));
    }
    Ok(embedding)
}

/// Only the empty string is refused; whitespace is valid chunk content.
pub(crate) fn ensure_input(provider: &str, text: &str) -> Result<()> {
    if text.is_empty() {
        return Err(RagError::provider(provider, "cannot embed empty text"));
    }
    Ok(())
}

/// Joins an API path onto a base URL, tolerating a missing trailing slash.
pub(crate) fn endpoint(base_url: &str, path: &str) -> Result<url::Url> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(url::Url::parse(&base)?.join(path)?)
}
