use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::types::ReplyToken;

/// Most messages the platform accepts in one reply call.
pub const MAX_REPLY_MESSAGES: usize = 5;
/// Longest text message the platform accepts, in characters.
pub const MAX_TEXT_CHARS: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReplyMessage {
    Text { text: String },
}

impl ReplyMessage {
    /// Builds a text message, truncated to [`MAX_TEXT_CHARS`].
    ///
    /// ```
    /// use dine_core::{MAX_TEXT_CHARS, ReplyMessage};
    ///
    /// let ReplyMessage::Text { text } = ReplyMessage::text("x".repeat(MAX_TEXT_CHARS + 10));
    /// assert_eq!(text.chars().count(), MAX_TEXT_CHARS);
    /// ```
    pub fn text(text: impl Into<String>) -> Self {
        let mut text = text.into();
        if let Some((idx, _)) = text.char_indices().nth(MAX_TEXT_CHARS) {
            text.truncate(idx);
        }
        ReplyMessage::Text { text }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("a reply carries 1 to {MAX_REPLY_MESSAGES} messages, got {0}")]
    InvalidMessages(usize),
    #[error("reply call timed out after {0:?}")]
    Timeout(Duration),
    #[error("reply transport failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("reply rejected with status {status}: {body}")]
    Api { status: u16, body: String },
}

impl ReplyError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ReplyError::Timeout(_))
    }
}

pub fn validate_messages(messages: &[ReplyMessage]) -> Result<(), ReplyError> {
    if messages.is_empty() || messages.len() > MAX_REPLY_MESSAGES {
        return Err(ReplyError::InvalidMessages(messages.len()));
    }
    Ok(())
}

/// Sends messages back through the platform using an event's reply token.
///
/// Implementations make exactly one attempt: a token is single-use, so a
/// retry after a failure would be rejected anyway.
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn reply(&self, token: &ReplyToken, messages: &[ReplyMessage]) -> Result<(), ReplyError>;
}

pub type SharedReplySender = Arc<dyn ReplySender>;
