//! Conversation and request lifecycle core for the knowledge-base chat client.
//!
//! The presentation layer talks to [`RequestController`]: it creates and
//! selects conversations, sends user text, cancels the in-flight request and
//! reads back snapshots of the conversation logs. Everything the controller
//! changes is also announced as a [`ChatEvent`].

pub mod controllers;
pub mod error;
pub mod models;
pub mod services;
pub mod settings;

pub use controllers::{RequestController, SendOutcome};
pub use error::{ChatError, ChatResult};
pub use models::{
    ChatEvent, Conversation, ConversationId, ConversationsStore, ErrorEntry, ErrorLevel,
    ErrorStore, Message, MessageId, Role,
};
pub use services::{
    AssistantReply, AssistantRequest, AssistantService, ErrorCollectorLayer,
    HttpAssistantService, RequestError,
};
pub use settings::{ClientSettings, JsonSettingsRepository, SettingsError, SettingsRepository};
