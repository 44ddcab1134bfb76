use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::conversation::ConversationId;

/// Per-conversation in-flight request state.
///
/// An entry exists exactly while the conversation is sending.
pub struct RequestState {
    cancel_token: CancellationToken,
    started_at: Instant,
}

impl RequestState {
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Tracks the single outstanding assistant call of each conversation.
///
/// Does NOT touch conversation logs; that is the controller's job. This type
/// only answers "is this conversation sending" and owns the cancellation
/// tokens.
pub struct RequestManager {
    requests: HashMap<ConversationId, RequestState>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self {
            requests: HashMap::new(),
        }
    }

    /// Mark a conversation as sending and hand out a fresh token.
    ///
    /// Returns `None` if a request is already in flight; the caller must drop
    /// its send in that case.
    pub fn begin(&mut self, conversation_id: ConversationId) -> Option<CancellationToken> {
        if self.requests.contains_key(&conversation_id) {
            debug!(conversation_id = %conversation_id, "Request already in flight");
            return None;
        }

        let cancel_token = CancellationToken::new();
        self.requests.insert(
            conversation_id,
            RequestState {
                cancel_token: cancel_token.clone(),
                started_at: Instant::now(),
            },
        );

        Some(cancel_token)
    }

    /// Signal the in-flight request's token. Leaves the entry in place; the
    /// settle path observes the token and calls [`RequestManager::finish`].
    pub fn cancel(&mut self, conversation_id: ConversationId) -> bool {
        match self.requests.get(&conversation_id) {
            Some(state) => {
                state.cancel_token.cancel();
                debug!(conversation_id = %conversation_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Clear the sending state and discard the token.
    pub fn finish(&mut self, conversation_id: ConversationId) -> Option<RequestState> {
        self.requests.remove(&conversation_id)
    }

    pub fn is_sending(&self, conversation_id: ConversationId) -> bool {
        self.requests.contains_key(&conversation_id)
    }

    pub fn has_active_requests(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Signal every in-flight token (app shutdown).
    pub fn cancel_all(&mut self) -> usize {
        for state in self.requests.values() {
            state.cancel_token.cancel();
        }
        self.requests.len()
    }
}

impl Default for RequestManager {
    fn default() -> Self {
        Self::new()
    }
}
