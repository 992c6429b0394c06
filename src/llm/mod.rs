//! The `ChatCompletion` capability: the LLM vendor abstracted behind a
//! single trait so the Planner and the summarizer depend on a capability,
//! not a concrete HTTP client. Mirrors the provider-client pattern used
//! throughout the corpus's LLM tooling (one trait, one `reqwest`-backed
//! implementation per vendor).

mod openai;

pub mod mock;

pub use openai::OpenAiChatClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub content: String,
}

/// Abstracts the LLM vendor. Both the Planner's plan-drafting call and the
/// Coordinator's summarization call go through this trait.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<ChatReply>;
}
