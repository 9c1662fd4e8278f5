//! Chat completion providers, one per backend behind [`ChatProvider`].

mod gemini;
mod openai;

pub use gemini::GeminiChat;
pub use openai::OpenAiChat;

use crate::config::Credentials;
use crate::error::Result;
use crate::models::{ChatMessage, Expert, ModelProvider};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Sends the full conversation (system messages included) and returns
    /// the assistant's reply text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Sampling settings taken from an expert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl From<&Expert> for SamplingParams {
    fn from(expert: &Expert) -> Self {
        Self {
            temperature: expert.temperature,
            top_p: expert.top_p,
            presence_penalty: expert.presence_penalty,
            frequency_penalty: expert.frequency_penalty,
        }
    }
}

/// Resolves the chat backend for an expert.
pub trait ChatProviderFactory: Send + Sync {
    fn provider_for(&self, expert: &Expert) -> Result<Arc<dyn ChatProvider>>;
}

/// Builds OpenAI or Gemini clients from environment credentials.
#[derive(Debug, Clone)]
pub struct RemoteChatProviders {
    credentials: Credentials,
}

impl RemoteChatProviders {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl ChatProviderFactory for RemoteChatProviders {
    fn provider_for(&self, expert: &Expert) -> Result<Arc<dyn ChatProvider>> {
        let api_key = self.credentials.key_for(expert.provider)?;
        let sampling = SamplingParams::from(expert);
        let provider: Arc<dyn ChatProvider> = match expert.provider {
            ModelProvider::OpenAi => Arc::new(OpenAiChat::new(api_key, &expert.model, sampling)?),
            ModelProvider::Google => Arc::new(GeminiChat::new(api_key, &expert.model, sampling)?),
        };
        Ok(provider)
    }
}
