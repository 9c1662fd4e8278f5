use super::{ChatProvider, SamplingParams};
use crate::embeddings::endpoint;
use crate::error::{RagError, Result};
use crate::models::{ChatMessage, ChatRole};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

const PROVIDER: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Flash models get a smaller output budget.
fn max_output_tokens(model: &str) -> u32 {
    if model.contains("flash") {
        1_024
    } else {
        2_048
    }
}

pub struct GeminiChat {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    sampling: SamplingParams,
}

impl GeminiChat {
    pub fn new(api_key: &str, model: &str, sampling: SamplingParams) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|error| RagError::provider(PROVIDER, error.to_string()))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            sampling,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// System messages become the system instruction; the rest map onto
    /// `user` / `model` turns.
    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let system = messages
            .iter()
            .filter(|message| message.role == ChatRole::System)
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let contents: Vec<Value> = messages
            .iter()
            .filter(|message| message.role != ChatRole::System)
            .map(|message| {
                let role = if message.role == ChatRole::Assistant {
                    "model"
                } else {
                    "user"
                };
                json!({ "role": role, "parts": [{ "text": message.content }] })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.sampling.temperature,
                "topP": self.sampling.top_p,
                "maxOutputTokens": max_output_tokens(&self.model),
            },
        });
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }
}

fn parse_generation(body: &str) -> Result<String> {
    let parsed: Value = serde_json::from_str(body)
        .map_err(|error| RagError::provider(PROVIDER, format!("malformed response: {error}")))?;

    let parts = parsed
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            let reason = parsed
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .unwrap_or("no candidates");
            RagError::provider(PROVIDER, format!("response contained no text: {reason}"))
        })?;

    Ok(parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(""))
}

#[async_trait]
impl ChatProvider for GeminiChat {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!(provider = PROVIDER, model = %self.model, message_count = messages.len(), "chat completion");

        let url = endpoint(&self.base_url, &format!("models/{}:generateContent", self.model))?;
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
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

        parse_generation(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(model: &str) -> GeminiChat {
        GeminiChat::new(
            "key",
            model,
            SamplingParams {
                temperature: 0.5,
                top_p: 0.95,
                presence_penalty: 0.0,
                frequency_penalty: 0.0,
            },
        )
        .unwrap()
    }

    #[test]
    fn flash_models_get_smaller_output_budget() {
        let flash = chat("gemini-1.5-flash").request_body(&[ChatMessage::user("hi")]);
        let pro = chat("gemini-1.5-pro").request_body(&[ChatMessage::user("hi")]);
        assert_eq!(flash["generationConfig"]["maxOutputTokens"], 1024);
        assert_eq!(pro["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn system_messages_become_instruction() {
        let body = chat("gemini-pro").request_body(&[
            ChatMessage::system("Persona."),
            ChatMessage::system("Context."),
            ChatMessage::user("Question?"),
            ChatMessage::assistant("Answer."),
        ]);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Persona.\n\nContext.");
        assert_eq!(body["contents"].as_array().unwrap().len(), 2);
        assert_eq!(body["contents"][1]["role"], "model");
    }

    #[test]
    fn text_parts_are_joined() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        assert_eq!(parse_generation(body).unwrap(), "Hello");
    }

    #[test]
    fn blocked_prompt_is_a_provider_error() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let error = parse_generation(body).unwrap_err();
        assert!(error.to_string().contains("SAFETY"));
    }
}
