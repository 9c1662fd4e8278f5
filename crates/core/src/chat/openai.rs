use super::{ChatProvider, SamplingParams};
use crate::embeddings::endpoint;
use crate::error::{RagError, Result};
use crate::models::{ChatMessage, ChatRole};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiChat {
    client: Client,
    url: url::Url,
    api_key: String,
    model: String,
    sampling: SamplingParams,
}

impl OpenAiChat {
    pub fn new(api_key: &str, model: &str, sampling: SamplingParams) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|error| RagError::provider(PROVIDER, error.to_string()))?;

        Ok(Self {
            client,
            url: endpoint(DEFAULT_BASE_URL, "chat/completions")?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            sampling,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.url = endpoint(base_url, "chat/completions")?;
        Ok(self)
    }

    fn request_body<'a>(&'a self, messages: &'a [ChatMessage]) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|message| WireMessage {
                    role: match message.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    content: &message.content,
                })
                .collect(),
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
            presence_penalty: self.sampling.presence_penalty,
            frequency_penalty: self.sampling.frequency_penalty,
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    top_p: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

fn parse_completion(body: &str) -> Result<String> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|error| RagError::provider(PROVIDER, format!("malformed response: {error}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| RagError::provider(PROVIDER, "response contained no message"))
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!(provider = PROVIDER, model = %self.model, message_count = messages.len(), "chat completion");

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages))
            .send()
            .await
            .map_err(|error| {
                error!(provider = PROVIDER, %error, "chat request failed");
                RagError::provider(PROVIDER, format!("request failed: {error}"))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| RagError::provider(PROVIDER, format!("reading body failed: {error}")))?;

        if !status.is_success() {
            error!(provider = PROVIDER, %status, "chat API error");
            let preview: String = body.chars().take(200).collect();
            return Err(RagError::provider(
                PROVIDER,
                format!("API returned {status}: {preview}"),
            ));
        }

        parse_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampling() -> SamplingParams {
        SamplingParams {
            temperature: 0.3,
            top_p: 0.8,
            presence_penalty: 0.1,
            frequency_penalty: 0.2,
        }
    }

    #[test]
    fn request_carries_roles_and_sampling() {
        let chat = OpenAiChat::new("sk-test", "gpt-4o-mini", sampling()).unwrap();
        let messages = vec![
            ChatMessage::system("You are terse."),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello."),
        ];
        let body = serde_json::to_value(chat.request_body(&messages)).unwrap();

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert_eq!(body["messages"][1]["content"], "Hi");
        assert!((body["presence_penalty"].as_f64().unwrap() - 0.1).abs() < 1e-6);
        assert!((body["top_p"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn first_choice_is_returned() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Sure."}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "Sure.");
    }

    #[test]
    fn empty_choices_are_a_provider_error() {
        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#),
            Err(RagError::Provider { .. })
        ));
    }
}
