use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::outcome::RequestError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Body of a question sent to the assistant service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AssistantRequest {
    pub user_id: String,
    pub conversation_id: String,
    pub message: String,
}

/// A successful answer.
#[derive(Clone, Debug, PartialEq)]
pub struct AssistantReply {
    pub answer: String,
    /// Correlation id echoed (or reassigned) by the service.
    pub conversation_id: Option<String>,
    /// Retrieved documents backing the answer, passed through untouched.
    pub sources: Vec<serde_json::Value>,
    /// Label of the backend that produced the answer.
    pub backend: Option<String>,
}

impl AssistantReply {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            conversation_id: None,
            sources: Vec::new(),
            backend: None,
        }
    }
}

/// The remote assistant as seen by the request controller.
///
/// Implementations should give up early once `cancel` is signalled, but the
/// controller does not rely on it: a settled call whose token was signalled
/// is reported as cancelled whatever it returned.
pub trait AssistantService: Send + Sync + 'static {
    fn ask(
        &self,
        request: AssistantRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<AssistantReply, RequestError>>;
}
