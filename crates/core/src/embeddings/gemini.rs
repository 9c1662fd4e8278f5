use super::{endpoint, ensure_embedding, ensure_input, EmbeddingProvider};
use crate::error::{RagError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

const PROVIDER: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "text-embedding-004";
const DEFAULT_DIMENSIONS: usize = 768;

/// Embeddings through the Gemini `embedContent` / `batchEmbedContents` API.
pub struct GeminiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl GeminiEmbedder {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::Config("Gemini API key must not be empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|error| RagError::provider(PROVIDER, error.to_string()))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.model = model.into();
        self.dimensions = dimensions;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn model_path(&self) -> String {
        format!("models/{}", self.model)
    }

    fn request_entry(&self, text: &str) -> Value {
        json!({
            "model": self.model_path(),
            "content": { "parts": [{ "text": text }] },
            "outputDimensionality": self.dimensions,
        })
    }

    async fn post(&self, method: &str, body: &Value) -> Result<String> {
        let url = endpoint(&self.base_url, &format!("{}:{method}", self.model_path()))?;
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|error| {
                error!(provider = PROVIDER, %error, "embedding request failed");
                RagError::provider(PROVIDER, format!("request failed: {error}"))
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| RagError::provider(PROVIDER, format!("reading body failed: {error}")))?;

        if !status.is_success() {
            error!(provider = PROVIDER, %status, "embedding API error");
            let detail = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|value| {
                    value
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| text.chars().take(200).collect());
            return Err(RagError::provider(
                PROVIDER,
                format!("API returned {status}: {detail}"),
            ));
        }

        Ok(text)
    }
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<ContentEmbedding>,
}

fn parse_single(body: &str, dimensions: usize) -> Result<Vec<f32>> {
    let parsed: EmbedResponse = serde_json::from_str(body)
        .map_err(|error| RagError::provider(PROVIDER, format!("malformed response: {error}")))?;
    ensure_embedding(PROVIDER, dimensions, parsed.embedding.values)
}

fn parse_batch(body: &str, expected_count: usize, dimensions: usize) -> Result<Vec<Vec<f32>>> {
    let parsed: BatchEmbedResponse = serde_json::from_str(body)
        .map_err(|error| RagError::provider(PROVIDER, format!("malformed response: {error}")))?;
    if parsed.embeddings.len() != expected_count {
        return Err(RagError::provider(
            PROVIDER,
            format!(
                "returned {} embeddings for {expected_count} inputs",
                parsed.embeddings.len()
            ),
        ));
    }
    parsed
        .embeddings
        .into_iter()
        .map(|embedding| ensure_embedding(PROVIDER, dimensions, embedding.values))
        .collect()
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        ensure_input(PROVIDER, text)?;
        debug!(provider = PROVIDER, model = %self.model, text_len = text.len(), "embedding single text");
        let body = self.post("embedContent", &self.request_entry(text)).await?;
        parse_single(&body, self.dimensions)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            ensure_input(PROVIDER, text)?;
        }
        debug!(provider = PROVIDER, model = %self.model, batch_size = texts.len(), "embedding batch");

        let requests: Vec<Value> = texts.iter().map(|text| self.request_entry(text)).collect();
        let body = self
            .post("batchEmbedContents", &json!({ "requests": requests }))
            .await?;
        parse_batch(&body, texts.len(), self.dimensions)
    }
}
