//! One chat turn: look up the expert, pull document context for the latest
//! user message and hand the assembled conversation to the expert's model.

use crate::chat::ChatProviderFactory;
use crate::error::Result;
use crate::experts::ExpertRepository;
use crate::models::{ChatMessage, ChatRole, RetrievedChunk};
use crate::retrieval::RetrievalService;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The model's answer plus the chunks that were shown to it.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub content: String,
    pub context: Vec<RetrievedChunk>,
}

pub struct ChatTurnService {
    retrieval: Arc<RetrievalService>,
    experts: Arc<dyn ExpertRepository>,
    providers: Arc<dyn ChatProviderFactory>,
}

impl ChatTurnService {
    pub fn new(
        retrieval: Arc<RetrievalService>,
        experts: Arc<dyn ExpertRepository>,
        providers: Arc<dyn ChatProviderFactory>,
    ) -> Self {
        Self {
            retrieval,
            experts,
            providers,
        }
    }

    /// Answers the last user message in `history` as `expert_id`.
    ///
    /// Retrieval problems never fail the turn: they are logged and the
    /// model is called without context. Unknown experts, missing
    /// credentials and chat provider failures are returned as errors.
    pub async fn respond(&self, expert_id: &str, history: &[ChatMessage]) -> Result<ChatReply> {
        let expert = self.experts.require(expert_id).await?;
        let provider = self.providers.provider_for(&expert)?;

        let context = match last_user_message(history) {
            Some(query) => self.context_for(expert_id, query).await,
            None => Vec::new(),
        };

        let messages = assemble_messages(&expert.system_prompt, &context, history);
        debug!(
            expert_id,
            provider = provider.name(),
            message_count = messages.len(),
            context_chunks = context.len(),
            "sending chat turn"
        );

        let content = provider.complete(&messages).await?;
        info!(expert_id, context_chunks = context.len(), "chat turn answered");
        Ok(ChatReply { content, context })
    }

    async fn context_for(&self, expert_id: &str, query: &str) -> Vec<RetrievedChunk> {
        let limit = self.retrieval.config().top_k;
        match self.retrieval.retrieve_context(expert_id, query, limit).await {
            Ok(chunks) => chunks,
            Err(error) => {
                warn!(expert_id, %error, "context retrieval failed, answering without documents");
                Vec::new()
            }
        }
    }
}

fn last_user_message(history: &[ChatMessage]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|message| message.role == ChatRole::User)
        .map(|message| message.content.as_str())
}

/// Joins retrieved chunks into a single system message, or `None` when
/// there is nothing to add.
pub fn context_message(chunks: &[RetrievedChunk]) -> Option<ChatMessage> {
    if chunks.is_empty() {
        return None;
    }

    let mut block = String::from(
        "Use the following excerpts from the expert's documents when they are relevant.\n",
    );
    for (index, chunk) in chunks.iter().enumerate() {
        block.push_str(&format!("\n[{}]\n{}\n", index + 1, chunk.content.trim()));
    }
    Some(ChatMessage::system(block))
}

/// `[system prompt, context (if any), history...]`.
pub fn assemble_messages(
    system_prompt: &str,
    context: &[RetrievedChunk],
    history: &[ChatMessage],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(context_message(context));
    messages.extend(history.iter().cloned());
    messages
}
