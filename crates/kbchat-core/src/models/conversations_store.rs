use tracing::debug;

use super::conversation::{Conversation, ConversationId};
use super::message::{Message, MessageId, Role};
use crate::error::{ChatError, ChatResult};

/// In-memory store for all conversations.
///
/// Holds at least one conversation at all times: the constructor seeds one
/// and nothing removes them. Conversations created later are kept newest
/// first. Ids for conversations and messages come from counters owned by the
/// store.
pub struct ConversationsStore {
    conversations: Vec<Conversation>,
    active_conversation_id: ConversationId,
    next_conversation_id: u64,
    next_message_id: u64,
}

impl ConversationsStore {
    pub fn new() -> Self {
        let mut store = Self {
            conversations: Vec::new(),
            active_conversation_id: ConversationId(1),
            next_conversation_id: 1,
            next_message_id: 1,
        };
        let seeded = store.create_conversation();
        store.active_conversation_id = seeded.id();
        store
    }

    fn allocate_conversation_id(&mut self) -> ConversationId {
        let id = ConversationId(self.next_conversation_id);
        self.next_conversation_id += 1;
        id
    }

    fn allocate_message_id(&mut self) -> MessageId {
        let id = MessageId(self.next_message_id);
        self.next_message_id += 1;
        id
    }

    fn position(&self, id: ConversationId) -> Option<usize> {
        self.conversations.iter().position(|c| c.id() == id)
    }

    /// Create a conversation seeded with the greeting and put it in front.
    /// Leaves the active selection unchanged.
    pub fn create_conversation(&mut self) -> Conversation {
        let id = self.allocate_conversation_id();
        let greeting_id = self.allocate_message_id();
        let conversation = Conversation::seeded(id, greeting_id);

        self.conversations.insert(0, conversation.clone());
        debug!(conversation_id = %id, "Created conversation");

        conversation
    }

    /// Append a message to a conversation's log.
    ///
    /// The first user message of a conversation also becomes its title.
    pub fn append_message(
        &mut self,
        conversation_id: ConversationId,
        role: Role,
        text: impl Into<String>,
    ) -> ChatResult<Message> {
        let index = self
            .position(conversation_id)
            .ok_or_else(|| ChatError::not_found(conversation_id))?;

        let message = Message::new(self.allocate_message_id(), role, text);
        self.conversations[index].push(message.clone());

        Ok(message)
    }

    /// Set the active conversation
    pub fn set_active(&mut self, id: ConversationId) -> ChatResult<()> {
        if self.contains(id) {
            self.active_conversation_id = id;
            Ok(())
        } else {
            Err(ChatError::not_found(id))
        }
    }

    /// Replace the id string sent to the assistant service for a conversation.
    pub fn set_correlation_id(
        &mut self,
        conversation_id: ConversationId,
        correlation_id: impl Into<String>,
    ) -> ChatResult<()> {
        let conversation = self
            .get_conversation_mut(conversation_id)
            .ok_or_else(|| ChatError::not_found(conversation_id))?;
        conversation.set_correlation_id(correlation_id.into());
        Ok(())
    }

    /// Get the active conversation.
    ///
    /// Falls back to the first conversation if the active id is unknown, so
    /// there is always something to select.
    pub fn active(&self) -> &Conversation {
        let index = self.position(self.active_conversation_id).unwrap_or(0);
        &self.conversations[index]
    }

    /// Get the active conversation ID
    pub fn active_id(&self) -> ConversationId {
        self.active().id()
    }

    pub fn get_conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id() == id)
    }

    fn get_conversation_mut(&mut self, id: ConversationId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id() == id)
    }

    pub fn contains(&self, id: ConversationId) -> bool {
        self.position(id).is_some()
    }

    /// All conversations, newest first.
    pub fn list_all(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn count(&self) -> usize {
        self.conversations.len()
    }
}

impl Default for ConversationsStore {
    fn default() -> Self {
        Self::new()
    }
}
