use super::{endpoint, ensure_embedding, ensure_input, EmbeddingProvider};
use crate::error::{RagError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-ada-002";
const DEFAULT_DIMENSIONS: usize = 1_536;

/// Embeddings through the OpenAI `/v1/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    url: url::Url,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::Config("OpenAI API key must not be empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|error| RagError::provider(PROVIDER, error.to_string()))?;

        Ok(Self {
            client,
            url: endpoint(DEFAULT_BASE_URL, "embeddings")?,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
        })
    }

    /// Selects another embedding model together with its output size.
    pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.model = model.into();
        self.dimensions = dimensions;
        self
    }

    /// Points the client at an OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.url = endpoint(base_url, "embeddings")?;
        Ok(self)
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        debug!(provider = PROVIDER, model = %self.model, batch_size = texts.len(), "embedding request");

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|error| {
                error!(provider = PROVIDER, %error, "embedding request failed");
                RagError::provider(PROVIDER, format!("request failed: {error}"))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| RagError::provider(PROVIDER, format!("reading body failed: {error}")))?;

        if !status.is_success() {
            error!(provider = PROVIDER, %status, "embedding API error");
            return Err(RagError::provider(
                PROVIDER,
                format!("API returned {status}: {}", error_detail(&body)),
            ));
        }

        parse_embeddings(&body, texts.len(), self.dimensions)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect())
}

fn parse_embeddings(body: &str, expected_count: usize, dimensions: usize) -> Result<Vec<Vec<f32>>> {
    let mut parsed: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|error| RagError::provider(PROVIDER, format!("malformed response: {error}")))?;

    if parsed.data.len() != expected_count {
        return Err(RagError::provider(
            PROVIDER,
            format!(
                "returned {} embeddings for {expected_count} inputs",
                parsed.data.len()
            ),
        ));
    }

    parsed.data.sort_by_key(|item| item.index);
    parsed
        .data
        .into_iter()
        .map(|item| ensure_embedding(PROVIDER, dimensions, item.embedding))
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        ensure_input(PROVIDER, text)?;
        self.request(&[text])
            .await?
            .pop()
            .ok_or_else(|| RagError::provider(PROVIDER, "API returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            ensure_input(PROVIDER, text)?;
        }
        self.request(texts).await
    }
}
