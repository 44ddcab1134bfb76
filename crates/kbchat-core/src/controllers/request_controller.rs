use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{ChatError, ChatResult};
use crate::models::{
    ChatEvent, Conversation, ConversationId, ConversationsStore, Message, RequestManager, Role,
};
use crate::services::{
    AssistantReply, AssistantRequest, AssistantService, RequestError, reply_text, settle,
};
use crate::settings::ClientSettings;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What a call to [`RequestController::send`] did.
#[derive(Clone, Debug, PartialEq)]
pub enum SendOutcome {
    /// The text was blank; nothing was appended and no call was made.
    EmptyInput,
    /// The conversation already had a request in flight; the text was dropped.
    AlreadySending,
    /// The call settled and `reply` was appended as the terminal message.
    Settled {
        reply: Message,
        result: Result<AssistantReply, RequestError>,
    },
}

/// Drives the lifecycle of assistant requests, one at most per conversation.
///
/// Every accepted `send` appends the user message, waits for the assistant
/// service, and appends exactly one assistant message whatever the outcome.
/// Clones share the same state, so a UI can keep one handle to `cancel` while
/// another is suspended in `send`.
#[derive(Clone)]
pub struct RequestController {
    store: Arc<Mutex<ConversationsStore>>,
    requests: Arc<Mutex<RequestManager>>,
    service: Arc<dyn AssistantService>,
    user_id: String,
    events: broadcast::Sender<ChatEvent>,
}

/// Clears the sending state when a send settles or its future is dropped.
struct InFlightGuard<'a> {
    controller: &'a RequestController,
    conversation_id: ConversationId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let finished = self.controller.requests.lock().finish(self.conversation_id);
        if let Some(state) = finished {
            debug!(
                conversation_id = %self.conversation_id,
                elapsed_ms = state.elapsed().as_millis() as u64,
                "Request finished"
            );
        }
        self.controller.emit(ChatEvent::SendingChanged {
            conversation_id: self.conversation_id,
            sending: false,
        });
    }
}

impl RequestController {
    pub fn new(service: Arc<dyn AssistantService>, settings: &ClientSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store: Arc::new(Mutex::new(ConversationsStore::new())),
            requests: Arc::new(Mutex::new(RequestManager::new())),
            service,
            user_id: settings.user_id.clone(),
            events,
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Create a conversation and make it the active one.
    pub fn create_conversation(&self) -> Conversation {
        let conversation = {
            let mut store = self.store.lock();
            let conversation = store.create_conversation();
            // Just inserted, cannot be missing.
            let _ = store.set_active(conversation.id());
            conversation
        };

        info!(conversation_id = %conversation.id(), "New conversation");
        self.emit(ChatEvent::ConversationCreated {
            conversation_id: conversation.id(),
        });
        self.emit(ChatEvent::ActiveChanged {
            conversation_id: conversation.id(),
        });

        conversation
    }

    pub fn set_active(&self, conversation_id: ConversationId) -> ChatResult<()> {
        self.store.lock().set_active(conversation_id)?;
        self.emit(ChatEvent::ActiveChanged { conversation_id });
        Ok(())
    }

    /// Send user text to the assistant and record the exchange.
    ///
    /// Resolves once the request has settled. Blank text and sends to a
    /// conversation that is already sending are dropped without touching
    /// the log. The only error is an unknown conversation id.
    pub async fn send(
        &self,
        conversation_id: ConversationId,
        raw_text: &str,
    ) -> ChatResult<SendOutcome> {
        let text = raw_text.trim();
        if text.is_empty() {
            debug!(conversation_id = %conversation_id, "Ignoring empty message");
            return Ok(SendOutcome::EmptyInput);
        }

        let correlation_id = self
            .store
            .lock()
            .get_conversation(conversation_id)
            .map(|conversation| conversation.correlation_id().to_string())
            .ok_or_else(|| ChatError::not_found(conversation_id))?;

        let begun = self.requests.lock().begin(conversation_id);
        let Some(cancel) = begun else {
            debug!(conversation_id = %conversation_id, "Dropping message, request in flight");
            return Ok(SendOutcome::AlreadySending);
        };
        let _in_flight = InFlightGuard {
            controller: self,
            conversation_id,
        };
        self.emit(ChatEvent::SendingChanged {
            conversation_id,
            sending: true,
        });

        self.append(conversation_id, Role::User, text)?;

        let request = AssistantRequest {
            user_id: self.user_id.clone(),
            conversation_id: correlation_id.clone(),
            message: text.to_string(),
        };

        info!(conversation_id = %conversation_id, "Sending message to assistant");
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RequestError::Cancelled),
            result = self.service.ask(request, cancel.clone()) => result,
        };
        let result = settle(cancel.is_cancelled(), result);

        match &result {
            Ok(reply) => {
                info!(
                    conversation_id = %conversation_id,
                    answer_len = reply.answer.len(),
                    sources = reply.sources.len(),
                    backend = ?reply.backend,
                    "Assistant answered"
                );
            }
            Err(RequestError::Cancelled) => {
                info!(conversation_id = %conversation_id, "Request cancelled");
            }
            Err(err) => {
                warn!(conversation_id = %conversation_id, error = %err, "Assistant request failed");
            }
        }

        let reply = self.append(conversation_id, Role::Assistant, reply_text(&result))?;

        if let Ok(answer) = &result {
            if let Some(remote_id) = answer.conversation_id.as_deref() {
                if remote_id != correlation_id {
                    self.update_correlation_id(conversation_id, remote_id);
                }
            }
        }

        self.emit(ChatEvent::RequestSettled {
            conversation_id,
            message_id: reply.id(),
            result: result.clone(),
        });

        Ok(SendOutcome::Settled { reply, result })
    }

    /// Record the id the service echoed back. Failure is logged, not returned.
    fn update_correlation_id(&self, conversation_id: ConversationId, remote_id: &str) {
        let updated = self
            .store
            .lock()
            .set_correlation_id(conversation_id, remote_id);
        match updated {
            Ok(()) => {
                debug!(conversation_id = %conversation_id, remote_id, "Correlation id updated");
            }
            Err(err) => {
                warn!(conversation_id = %conversation_id, error = %err, "Failed to update correlation id");
            }
        }
    }

    /// Ask the in-flight request of a conversation to stop.
    ///
    /// Returns `false` if nothing was in flight. The pending `send` appends
    /// the cancellation notice and clears the sending state.
    pub fn cancel(&self, conversation_id: ConversationId) -> bool {
        let cancelled = self.requests.lock().cancel(conversation_id);
        if cancelled {
            info!(conversation_id = %conversation_id, "Cancelling request");
        }
        cancelled
    }

    /// Signal every in-flight request (app shutdown).
    pub fn cancel_all(&self) -> usize {
        self.requests.lock().cancel_all()
    }

    fn append(
        &self,
        conversation_id: ConversationId,
        role: Role,
        text: impl Into<String>,
    ) -> ChatResult<Message> {
        let (message, new_title) = {
            let mut store = self.store.lock();
            let had_user_message = store
                .get_conversation(conversation_id)
                .is_some_and(Conversation::has_user_message);
            let message = store.append_message(conversation_id, role, text)?;
            let new_title = (message.is_user() && !had_user_message)
                .then(|| message.text().to_string());
            (message, new_title)
        };

        self.emit(ChatEvent::MessageAppended {
            conversation_id,
            message_id: message.id(),
        });
        if let Some(title) = new_title {
            self.emit(ChatEvent::TitleChanged {
                conversation_id,
                title,
            });
        }

        Ok(message)
    }

    pub fn is_sending(&self, conversation_id: ConversationId) -> bool {
        self.requests.lock().is_sending(conversation_id)
    }

    pub fn has_active_requests(&self) -> bool {
        self.requests.lock().has_active_requests()
    }

    pub fn active_id(&self) -> ConversationId {
        self.store.lock().active_id()
    }

    pub fn active_conversation(&self) -> Conversation {
        self.store.lock().active().clone()
    }

    pub fn conversation(&self, conversation_id: ConversationId) -> Option<Conversation> {
        self.store.lock().get_conversation(conversation_id).cloned()
    }

    /// Snapshot of all conversations, newest first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.store.lock().list_all().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::watch;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::models::GREETING;
    use crate::services::{BoxFuture, CANCELLED_NOTICE, TRANSPORT_FAILURE_NOTICE};

    /// Answers immediately with a fixed result and records every request.
    struct ScriptedAssistant {
        result: Result<AssistantReply, RequestError>,
        calls: AtomicUsize,
        requests: Mutex<Vec<AssistantRequest>>,
    }

    impl ScriptedAssistant {
        fn new(result: Result<AssistantReply, RequestError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    impl AssistantService for ScriptedAssistant {
        fn ask(
            &self,
            request: AssistantRequest,
            _cancel: CancellationToken,
        ) -> BoxFuture<'static, Result<AssistantReply, RequestError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().push(request);
            let result = self.result.clone();
            Box::pin(async move { result })
        }
    }

    /// Holds every call until the gate opens, ignoring cancellation.
    struct GatedAssistant {
        gate: watch::Receiver<bool>,
        result: Result<AssistantReply, RequestError>,
        calls: AtomicUsize,
    }

    impl GatedAssistant {
        fn new(result: Result<AssistantReply, RequestError>) -> (Arc<Self>, watch::Sender<bool>) {
            let (open, gate) = watch::channel(false);
            let service = Arc::new(Self {
                gate,
                result,
                calls: AtomicUsize::new(0),
            });
            (service, open)
        }
    }

    impl AssistantService for GatedAssistant {
        fn ask(
            &self,
            _request: AssistantRequest,
            _cancel: CancellationToken,
        ) -> BoxFuture<'static, Result<AssistantReply, RequestError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut gate = self.gate.clone();
            let result = self.result.clone();
            Box::pin(async move {
                let _ = gate.wait_for(|open| *open).await;
                result
            })
        }
    }

    /// Simulates a cancel racing a response that arrives in the same instant.
    struct CancelThenAnswer;

    impl AssistantService for CancelThenAnswer {
        fn ask(
            &self,
            _request: AssistantRequest,
            cancel: CancellationToken,
        ) -> BoxFuture<'static, Result<AssistantReply, RequestError>> {
            Box::pin(async move {
                cancel.cancel();
                Ok(AssistantReply::new("answer that lost the race"))
            })
        }
    }

    fn controller_with(service: Arc<dyn AssistantService>) -> RequestController {
        RequestController::new(service, &ClientSettings::default())
    }

    async fn wait_until_sending(controller: &RequestController, id: ConversationId) {
        while !controller.is_sending(id) {
            tokio::task::yield_now().await;
        }
    }

    fn texts(conversation: &Conversation) -> Vec<(Role, String)> {
        conversation
            .messages()
            .iter()
            .map(|m| (m.role(), m.text().to_string()))
            .collect()
    }

    #[test]
    fn test_fresh_controller_has_one_seeded_conversation() {
        let controller = controller_with(ScriptedAssistant::new(Ok(AssistantReply::new("hi"))));

        let conversations = controller.conversations();
        assert_eq!(conversations.len(), 1);
        assert_eq!(
            texts(&conversations[0]),
            vec![(Role::Assistant, GREETING.to_string())]
        );
        assert!(!controller.is_sending(conversations[0].id()));
    }

    #[tokio::test]
    async fn test_whitespace_message_is_ignored() {
        let service = ScriptedAssistant::new(Ok(AssistantReply::new("hi")));
        let controller = controller_with(service.clone());
        let id = controller.active_id();

        let outcome = controller.send(id, "  \n\t ").await.unwrap();

        assert_eq!(outcome, SendOutcome::EmptyInput);
        assert_eq!(controller.active_conversation().message_count(), 1);
        assert!(!controller.is_sending(id));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_send_appends_user_and_answer() {
        let service = ScriptedAssistant::new(Ok(AssistantReply::new("hi")));
        let controller = controller_with(service.clone());
        let id = controller.active_id();

        let outcome = controller.send(id, "  hello  ").await.unwrap();

        let conversation = controller.conversation(id).unwrap();
        assert_eq!(
            texts(&conversation),
            vec![
                (Role::Assistant, GREETING.to_string()),
                (Role::User, "hello".to_string()),
                (Role::Assistant, "hi".to_string()),
            ]
        );
        assert_eq!(conversation.title(), "hello");
        assert!(!controller.is_sending(id));
        assert!(matches!(outcome, SendOutcome::Settled { result: Ok(_), .. }));

        let requests = service.requests.lock();
        assert_eq!(
            requests[0],
            AssistantRequest {
                user_id: "demo-user".to_string(),
                conversation_id: id.to_string(),
                message: "hello".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_service_error_detail_becomes_reply() {
        let controller = controller_with(ScriptedAssistant::new(Err(
            RequestError::ServiceError {
                status: 500,
                detail: Some("overloaded".to_string()),
            },
        )));
        let id = controller.active_id();

        let outcome = controller.send(id, "hello").await.unwrap();

        let SendOutcome::Settled { reply, .. } = outcome else {
            panic!("expected a settled request, got {outcome:?}");
        };
        assert_eq!(reply.role(), Role::Assistant);
        assert_eq!(reply.text(), "overloaded");
        assert_eq!(controller.conversation(id).unwrap().message_count(), 3);
        assert!(!controller.is_sending(id));
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_fixed_notice() {
        let controller = controller_with(ScriptedAssistant::new(Err(RequestError::transport(
            "connection refused",
        ))));
        let id = controller.active_id();

        controller.send(id, "hello").await.unwrap();

        let conversation = controller.conversation(id).unwrap();
        assert_eq!(
            conversation.last_message().unwrap().text(),
            TRANSPORT_FAILURE_NOTICE
        );
    }

    #[tokio::test]
    async fn test_cancel_before_settle_wins_over_late_answer() {
        let (service, open) = GatedAssistant::new(Ok(AssistantReply::new("late answer")));
        let controller = controller_with(service);
        let id = controller.active_id();

        let sender = controller.clone();
        let pending = tokio::spawn(async move { sender.send(id, "hello").await });
        wait_until_sending(&controller, id).await;

        assert!(controller.cancel(id));
        open.send(true).unwrap();
        let outcome = pending.await.unwrap().unwrap();

        let SendOutcome::Settled { reply, result } = outcome else {
            panic!("expected a settled request, got {outcome:?}");
        };
        assert_eq!(reply.text(), CANCELLED_NOTICE);
        assert_eq!(result, Err(RequestError::Cancelled));
        let conversation = controller.conversation(id).unwrap();
        assert_eq!(conversation.message_count(), 3);
        assert_eq!(conversation.messages()[1].text(), "hello");
        assert!(!controller.is_sending(id));
    }

    #[tokio::test]
    async fn test_cancel_signalled_during_call_discards_response() {
        let controller = controller_with(Arc::new(CancelThenAnswer));
        let id = controller.active_id();

        let outcome = controller.send(id, "hello").await.unwrap();

        let SendOutcome::Settled { reply, .. } = outcome else {
            panic!("expected a settled request, got {outcome:?}");
        };
        assert_eq!(reply.text(), CANCELLED_NOTICE);
    }

    #[tokio::test]
    async fn test_send_while_sending_is_dropped() {
        let (service, open) = GatedAssistant::new(Ok(AssistantReply::new("hi")));
        let controller = controller_with(service.clone());
        let id = controller.active_id();

        let sender = controller.clone();
        let pending = tokio::spawn(async move { sender.send(id, "first").await });
        wait_until_sending(&controller, id).await;

        let second = controller.send(id, "second").await.unwrap();

        assert_eq!(second, SendOutcome::AlreadySending);
        assert_eq!(controller.conversation(id).unwrap().message_count(), 2);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);

        open.send(true).unwrap();
        pending.await.unwrap().unwrap();
        let conversation = controller.conversation(id).unwrap();
        assert_eq!(
            texts(&conversation)[1..],
            [
                (Role::User, "first".to_string()),
                (Role::Assistant, "hi".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_conversations_send_independently() {
        let (service, open) = GatedAssistant::new(Ok(AssistantReply::new("hi")));
        let controller = controller_with(service.clone());
        let first = controller.active_id();
        let second = controller.create_conversation().id();

        let a = controller.clone();
        let b = controller.clone();
        let pending_first = tokio::spawn(async move { a.send(first, "one").await });
        let pending_second = tokio::spawn(async move { b.send(second, "two").await });
        wait_until_sending(&controller, first).await;
        wait_until_sending(&controller, second).await;

        assert!(controller.cancel(second));
        open.send(true).unwrap();
        pending_first.await.unwrap().unwrap();
        pending_second.await.unwrap().unwrap();

        let first_reply = controller.conversation(first).unwrap();
        let second_reply = controller.conversation(second).unwrap();
        assert_eq!(first_reply.last_message().unwrap().text(), "hi");
        assert_eq!(second_reply.last_message().unwrap().text(), CANCELLED_NOTICE);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_without_request_is_noop() {
        let controller = controller_with(ScriptedAssistant::new(Ok(AssistantReply::new("hi"))));
        let id = controller.active_id();

        assert!(!controller.cancel(id));
        assert_eq!(controller.conversation(id).unwrap().message_count(), 1);
        assert!(!controller.is_sending(id));
    }

    #[tokio::test]
    async fn test_dropped_send_clears_sending() {
        let (service, _open) = GatedAssistant::new(Ok(AssistantReply::new("hi")));
        let controller = controller_with(service);
        let id = controller.active_id();

        let sender = controller.clone();
        let pending = tokio::spawn(async move { sender.send(id, "hello").await });
        wait_until_sending(&controller, id).await;

        pending.abort();
        let _ = pending.await;

        assert!(!controller.is_sending(id));
        assert!(!controller.has_active_requests());
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_an_error() {
        let controller = controller_with(ScriptedAssistant::new(Ok(AssistantReply::new("hi"))));

        let err = controller.send(ConversationId(77), "hello").await.unwrap_err();

        assert!(matches!(err, ChatError::ConversationNotFound { .. }));
        assert!(!controller.is_sending(ConversationId(77)));
    }

    #[tokio::test]
    async fn test_title_set_by_first_message_only() {
        let controller = controller_with(ScriptedAssistant::new(Ok(AssistantReply::new("ok"))));
        let id = controller.active_id();

        controller.send(id, "New conversation 9").await.unwrap();
        controller.send(id, "follow-up").await.unwrap();

        let conversation = controller.conversation(id).unwrap();
        assert_eq!(conversation.title(), "New conversation 9");
        assert_eq!(conversation.message_count(), 5);
    }

    #[tokio::test]
    async fn test_echoed_conversation_id_is_used_for_next_request() {
        let mut reply = AssistantReply::new("hi");
        reply.conversation_id = Some("kb-42".to_string());
        let service = ScriptedAssistant::new(Ok(reply));
        let controller = controller_with(service.clone());
        let id = controller.active_id();

        controller.send(id, "first").await.unwrap();
        controller.send(id, "second").await.unwrap();

        let requests = service.requests.lock();
        assert_eq!(requests[0].conversation_id, id.to_string());
        assert_eq!(requests[1].conversation_id, "kb-42");
    }

    #[tokio::test]
    async fn test_lost_conversation_on_settle_still_clears_sending() {
        let mut reply = AssistantReply::new("hi");
        reply.conversation_id = Some("kb-9".to_string());
        let (service, open) = GatedAssistant::new(Ok(reply));
        let controller = controller_with(service);
        let id = controller.create_conversation().id();

        let sender = controller.clone();
        let pending = tokio::spawn(async move { sender.send(id, "hello").await });
        wait_until_sending(&controller, id).await;

        // Only the seeded conversation survives the swap.
        *controller.store.lock() = ConversationsStore::new();
        open.send(true).unwrap();
        let err = pending.await.unwrap().unwrap_err();

        assert!(matches!(err, ChatError::ConversationNotFound { .. }));
        assert!(!controller.is_sending(id));
        assert!(!controller.has_active_requests());
    }

    #[tokio::test]
    async fn test_correlation_id_update_on_unknown_conversation_is_logged() {
        let controller = controller_with(ScriptedAssistant::new(Ok(AssistantReply::new("hi"))));
        let id = controller.active_id();

        controller.update_correlation_id(ConversationId(404), "kb-1");
        controller.send(id, "hello").await.unwrap();

        let conversation = controller.conversation(id).unwrap();
        assert_eq!(conversation.last_message().unwrap().text(), "hi");
        assert_eq!(conversation.correlation_id(), id.to_string());
    }

    #[tokio::test]
    async fn test_create_conversation_selects_it() {
        let controller = controller_with(ScriptedAssistant::new(Ok(AssistantReply::new("hi"))));
        let seeded = controller.active_id();

        let created = controller.create_conversation();

        assert_eq!(controller.active_id(), created.id());
        assert_eq!(controller.conversations()[0].id(), created.id());
        controller.set_active(seeded).unwrap();
        assert_eq!(controller.active_id(), seeded);
        assert!(controller.set_active(ConversationId(500)).is_err());
    }

    #[tokio::test]
    async fn test_send_emits_events_in_order() {
        let controller = controller_with(ScriptedAssistant::new(Ok(AssistantReply::new("hi"))));
        let id = controller.active_id();
        let mut events = controller.subscribe();

        controller.send(id, "hello").await.unwrap();

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.conversation_id(), id);
            received.push(event);
        }
        assert!(matches!(
            received[0],
            ChatEvent::SendingChanged { sending: true, .. }
        ));
        assert!(matches!(received[1], ChatEvent::MessageAppended { .. }));
        assert!(matches!(
            &received[2],
            ChatEvent::TitleChanged { title, .. } if title == "hello"
        ));
        assert!(matches!(received[3], ChatEvent::MessageAppended { .. }));
        assert!(matches!(
            received[4],
            ChatEvent::RequestSettled { result: Ok(_), .. }
        ));
        assert!(matches!(
            received[5],
            ChatEvent::SendingChanged { sending: false, .. }
        ));
        assert_eq!(received.len(), 6);
    }
}
