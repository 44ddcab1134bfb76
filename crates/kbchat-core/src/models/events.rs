use super::conversation::ConversationId;
use super::message::MessageId;
use crate::services::{AssistantReply, RequestError};

/// Change notifications for presentation layers.
/// Each variant is tagged with `conversation_id` so subscribers can filter.
#[derive(Clone, Debug)]
pub enum ChatEvent {
    ConversationCreated {
        conversation_id: ConversationId,
    },
    ActiveChanged {
        conversation_id: ConversationId,
    },
    MessageAppended {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    TitleChanged {
        conversation_id: ConversationId,
        title: String,
    },
    SendingChanged {
        conversation_id: ConversationId,
        sending: bool,
    },
    RequestSettled {
        conversation_id: ConversationId,
        message_id: MessageId,
        result: Result<AssistantReply, RequestError>,
    },
}

impl ChatEvent {
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            ChatEvent::ConversationCreated { conversation_id }
            | ChatEvent::ActiveChanged { conversation_id }
            | ChatEvent::MessageAppended { conversation_id, .. }
            | ChatEvent::TitleChanged { conversation_id, .. }
            | ChatEvent::SendingChanged { conversation_id, .. }
            | ChatEvent::RequestSettled { conversation_id, .. } => *conversation_id,
        }
    }
}
