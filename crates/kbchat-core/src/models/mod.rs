pub mod conversation;
pub mod conversations_store;
pub mod error_store;
pub mod events;
pub mod message;
pub mod request_manager;

pub use conversation::{Conversation, ConversationId, GREETING, PLACEHOLDER_TITLE_PREFIX};
pub use conversations_store::ConversationsStore;
pub use error_store::{ErrorEntry, ErrorLevel, ErrorStore};
pub use events::ChatEvent;
pub use message::{Message, MessageId, Role};
pub use request_manager::RequestManager;
