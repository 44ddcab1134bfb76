use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::assistant_service::{AssistantReply, AssistantRequest, AssistantService, BoxFuture};
use super::outcome::RequestError;
use crate::error::ChatResult;
use crate::settings::ClientSettings;

/// Assistant service reached over HTTP: one JSON POST per question.
#[derive(Clone)]
pub struct HttpAssistantService {
    client: Client,
    endpoint: String,
}

impl HttpAssistantService {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> ChatResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kbchat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> ChatResult<Self> {
        Self::new(settings.endpoint.clone(), settings.request_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl AssistantService for HttpAssistantService {
    fn ask(
        &self,
        request: AssistantRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<AssistantReply, RequestError>> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();

        Box::pin(async move {
            // Dropping the request future aborts the connection.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(endpoint = %endpoint, "Assistant request aborted");
                    Err(RequestError::Cancelled)
                }
                result = post_question(&client, &endpoint, &request) => result,
            }
        })
    }
}

async fn post_question(
    client: &Client,
    endpoint: &str,
    request: &AssistantRequest,
) -> Result<AssistantReply, RequestError> {
    let response = client
        .post(endpoint)
        .json(request)
        .send()
        .await
        .map_err(|err| {
            warn!(endpoint = %endpoint, error = %err, "Assistant request failed");
            RequestError::transport(err.to_string())
        })?;

    let status = response.status();
    let body = response.text().await.map_err(|err| {
        warn!(status = status.as_u16(), error = %err, "Failed to read assistant response body");
        RequestError::transport(err.to_string())
    })?;

    if !status.is_success() {
        return Err(map_http_error(status, &body));
    }

    parse_answer(&body)
}

/// Build a `ServiceError`, pulling a human-readable reason from the body when
/// the service sent one.
fn map_http_error(status: StatusCode, body: &str) -> RequestError {
    let detail = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        ["error", "detail"]
            .iter()
            .find_map(|key| {
                value
                    .get(*key)
                    .and_then(Value::as_str)
                    .filter(|text| !text.trim().is_empty())
            })
            .map(str::to_string)
    });

    warn!(status = status.as_u16(), detail = ?detail, "Assistant service returned an error");

    RequestError::ServiceError {
        status: status.as_u16(),
        detail,
    }
}

fn parse_answer(body: &str) -> Result<AssistantReply, RequestError> {
    let value: Value = serde_json::from_str(body).map_err(|err| {
        warn!(error = %err, "Assistant response is not JSON");
        RequestError::transport(format!("invalid response body: {err}"))
    })?;

    let answer = value
        .get("answer")
        .and_then(Value::as_str)
        .filter(|answer| !answer.trim().is_empty());

    let Some(answer) = answer else {
        let service_error = value.get("error").and_then(Value::as_str);
        warn!(service_error = ?service_error, "Assistant response has no answer");
        return Err(RequestError::MalformedResponse);
    };

    Ok(AssistantReply {
        answer: answer.to_string(),
        conversation_id: value
            .get("conversation_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        sources: value
            .get("sources")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        backend: value
            .get("backend")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}
