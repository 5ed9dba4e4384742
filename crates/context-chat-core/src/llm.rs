//! Language-model backend contract.
//!
//! A request carries system instructions and an ordered message list. The
//! backend answers either with a single text payload ([`complete`]) or an
//! incremental fragment stream ([`stream`]). Dropping the stream must
//! abandon the underlying call.
//!
//! [`complete`]: LanguageModel::complete
//! [`stream`]: LanguageModel::stream

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::models::{Role, Turn};

/// Forward-only, single-consumer sequence of text fragments. The stream
/// ends after the final fragment; an `Err` item is an error terminator.
pub type FragmentStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl CompletionRequest {
    /// Total characters across instructions and messages.
    pub fn char_len(&self) -> usize {
        self.system.chars().count()
            + self
                .messages
                .iter()
                .map(|m| m.content.chars().count())
                .sum::<usize>()
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Single-payload completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Incremental completion.
    async fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream>;
}
