//! Classification of settled assistant calls.
//!
//! Every settled call maps to exactly one assistant message text. The texts
//! for the fixed outcomes live here so front-ends can recognise them.

use thiserror::Error;

use super::assistant_service::AssistantReply;

pub const EMPTY_INPUT_NOTICE: &str = "Please type a question first.";
pub const CANCELLED_NOTICE: &str = "Request cancelled.";
pub const MALFORMED_RESPONSE_NOTICE: &str = "Sorry, I couldn't get an answer.";
pub const TRANSPORT_FAILURE_NOTICE: &str = "Sorry, I couldn't reach the assistant.";

/// Ways a request can fail to produce an answer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("empty input")]
    EmptyInput,

    #[error("request cancelled")]
    Cancelled,

    #[error("assistant service returned status {status}")]
    ServiceError { status: u16, detail: Option<String> },

    #[error("assistant service response has no answer")]
    MalformedResponse,

    #[error("assistant service unreachable: {reason}")]
    TransportFailure { reason: String },
}

impl RequestError {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::TransportFailure {
            reason: reason.into(),
        }
    }

    /// Text of the assistant message recording this failure.
    pub fn notice(&self) -> String {
        match self {
            Self::EmptyInput => EMPTY_INPUT_NOTICE.to_string(),
            Self::Cancelled => CANCELLED_NOTICE.to_string(),
            Self::ServiceError { status, detail } => match detail {
                Some(detail) if !detail.trim().is_empty() => detail.clone(),
                _ => format!("Backend error ({status})"),
            },
            Self::MalformedResponse => MALFORMED_RESPONSE_NOTICE.to_string(),
            Self::TransportFailure { .. } => TRANSPORT_FAILURE_NOTICE.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Final classification of a call. A signalled token wins over whatever the
/// call produced.
pub fn settle(
    cancelled: bool,
    result: Result<AssistantReply, RequestError>,
) -> Result<AssistantReply, RequestError> {
    if cancelled {
        Err(RequestError::Cancelled)
    } else {
        result
    }
}

/// Text of the assistant message appended for a settled call.
pub fn reply_text(result: &Result<AssistantReply, RequestError>) -> String {
    match result {
        Ok(reply) => reply.answer.clone(),
        Err(err) => err.notice(),
    }
}
