pub mod assistant_service;
pub mod error_collector_layer;
pub mod http_assistant;
pub mod outcome;

pub use assistant_service::{AssistantReply, AssistantRequest, AssistantService, BoxFuture};
pub use error_collector_layer::ErrorCollectorLayer;
pub use http_assistant::HttpAssistantService;
pub use outcome::{
    CANCELLED_NOTICE, EMPTY_INPUT_NOTICE, MALFORMED_RESPONSE_NOTICE, RequestError,
    TRANSPORT_FAILURE_NOTICE, reply_text, settle,
};
