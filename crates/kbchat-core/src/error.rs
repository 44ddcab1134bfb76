use thiserror::Error;

use crate::models::ConversationId;

/// Faults surfaced to callers of the core.
///
/// Failed assistant calls never end up here; they are turned into assistant
/// messages by the controller. A `ConversationNotFound` means the caller
/// handed over an id the store never issued.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: ConversationId },

    #[error("HTTP client initialization failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl ChatError {
    pub fn not_found(id: ConversationId) -> Self {
        Self::ConversationNotFound { id }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
