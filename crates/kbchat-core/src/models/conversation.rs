use std::fmt;

use super::message::{Message, MessageId, Role};

/// Text of the assistant message every conversation starts with.
pub const GREETING: &str = "Hi! Ask me anything about the knowledge base.";

/// Prefix of the title a conversation carries until its first user message.
pub const PLACEHOLDER_TITLE_PREFIX: &str = "New conversation";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConversationId(pub u64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single conversation with the assistant: an append-only log plus a title
/// derived from the first user message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    id: ConversationId,
    title: String,
    messages: Vec<Message>,
    correlation_id: String,
}

impl Conversation {
    /// Create a conversation seeded with the greeting.
    pub(crate) fn seeded(id: ConversationId, greeting_id: MessageId) -> Self {
        Self {
            id,
            title: format!("{} {}", PLACEHOLDER_TITLE_PREFIX, id.0),
            messages: vec![Message::new(greeting_id, Role::Assistant, GREETING)],
            correlation_id: id.to_string(),
        }
    }

    /// Append a message. The first user message also becomes the title.
    pub(crate) fn push(&mut self, message: Message) {
        if message.is_user() && !self.has_user_message() {
            self.title = message.text().to_string();
        }
        self.messages.push(message);
    }

    pub(crate) fn set_correlation_id(&mut self, correlation_id: String) {
        self.correlation_id = correlation_id;
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Id string sent to the assistant service with every request.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Whether any user message has been appended yet.
    pub fn has_user_message(&self) -> bool {
        self.messages.iter().any(Message::is_user)
    }
}
