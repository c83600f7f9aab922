//! Conversation session - drives one stage's conversation
//!
//! A session owns the observable [`ConversationState`], the phase machine and
//! at most one active attempt. Starting a new send or resume cancels the
//! previous attempt; every state write of an attempt is checked against its
//! cancellation token under the state lock, so a superseded attempt never
//! mutates shared state after it was cancelled.

mod events;
mod state;

pub use events::{SessionCallbacks, SessionEvent};
pub use state::{CompletedTurn, ConversationState, SessionConfig, TurnOutcome};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chat_core::Message;
use chat_state::{ConversationEvent, StateMachine, StateTransition};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::auth::Credentials;
use crate::backend::{AgentBackend, AgentRequest, ConversationStore, ResumeOptions};
use crate::error::{ChatClientError, Result};
use crate::recovery::{RecoveryManager, RecoveryResult};
use crate::retry::RetryController;
use crate::stream::{EventStream, StreamEvent};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn apply_event(
    machine: &mut StateMachine,
    state: &mut ConversationState,
    event: ConversationEvent,
) {
    match machine.handle_event(event) {
        Ok(transition) => state.sync_phase(&transition.to),
        Err(err) => log::debug!("{}", err),
    }
}

struct ActiveAttempt {
    id: u64,
    cancel: CancellationToken,
}

struct SessionInner {
    backend: Arc<dyn AgentBackend>,
    store: Arc<dyn ConversationStore>,
    recovery: RecoveryManager,
    credentials: Credentials,
    config: SessionConfig,
    retry: RetryController,
    state: watch::Sender<ConversationState>,
    machine: Mutex<StateMachine>,
    active: Mutex<Option<ActiveAttempt>>,
    next_attempt_id: AtomicU64,
    conversation_id: Mutex<Option<String>>,
    /// Serializes conversation creation so concurrent sends share one id.
    creation: tokio::sync::Mutex<()>,
    stage_context: RwLock<serde_json::Value>,
    last_message: Mutex<Option<String>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

/// Handle to one conversation session. Clones share the same session.
#[derive(Clone)]
pub struct ConversationSession {
    inner: Arc<SessionInner>,
}

impl ConversationSession {
    /// Create a session and the receiver of its [`SessionEvent`]s.
    pub fn new(
        backend: Arc<dyn AgentBackend>,
        store: Arc<dyn ConversationStore>,
        credentials: Credentials,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConversationState::default());

        let inner = SessionInner {
            backend,
            recovery: RecoveryManager::new(store.clone()),
            store,
            credentials,
            retry: RetryController::new(config.retry),
            config,
            state,
            machine: Mutex::new(StateMachine::new()),
            active: Mutex::new(None),
            next_attempt_id: AtomicU64::new(1),
            conversation_id: Mutex::new(None),
            creation: tokio::sync::Mutex::new(()),
            stage_context: RwLock::new(serde_json::Value::Null),
            last_message: Mutex::new(None),
            events,
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    /// Send a user turn and stream the agent's reply.
    ///
    /// Cancels any attempt still in flight. Transient failures are retried
    /// per the session's retry policy; only the terminal failure becomes the
    /// visible `error`.
    pub async fn send_message(&self, text: impl Into<String>) -> TurnOutcome {
        let text = text.into();
        *lock(&self.inner.last_message) = Some(text.clone());

        let (attempt_id, cancel) = self.inner.begin_attempt();
        let outcome = self.inner.run_send(&cancel, text).await;
        self.inner.finish_attempt(attempt_id);
        outcome
    }

    /// Re-send the last user message. `None` when nothing was sent yet.
    pub async fn retry(&self) -> Option<TurnOutcome> {
        let last = lock(&self.inner.last_message).clone();
        match last {
            Some(text) => Some(self.send_message(text).await),
            None => {
                log::debug!("Nothing to retry");
                None
            }
        }
    }

    /// Adopt `conversation_id`, restore its persisted state and, if the
    /// backend is still producing it, re-open the stream from the last stored
    /// token.
    pub async fn resume(&self, conversation_id: impl Into<String>) -> TurnOutcome {
        let (attempt_id, cancel) = self.inner.begin_attempt();
        let outcome = self.inner.run_resume(&cancel, conversation_id.into()).await;
        self.inner.finish_attempt(attempt_id);
        outcome
    }

    pub fn clear_error(&self) {
        self.inner.update(|state, machine| {
            state.error = None;
            if machine.can_transition(&ConversationEvent::ErrorCleared) {
                apply_event(machine, state, ConversationEvent::ErrorCleared);
            }
        });
    }

    /// Abort the in-flight attempt, if any, without surfacing an error.
    pub fn cancel(&self) {
        let active = lock(&self.inner.active).take();
        if let Some(active) = active {
            self.inner.cancel_attempt(active);
        }
    }

    /// Forget the conversation so the next send creates a new one.
    pub fn reset_conversation(&self) {
        self.cancel();
        *lock(&self.inner.conversation_id) = None;
        *lock(&self.inner.last_message) = None;
        self.inner.update(|state, machine| {
            machine.reset();
            *state = ConversationState::default();
            state.sync_phase(machine.phase());
        });
    }

    /// Context sent with every following stream request.
    pub fn set_stage_context(&self, context: serde_json::Value) {
        *self
            .inner
            .stage_context
            .write()
            .unwrap_or_else(PoisonError::into_inner) = context;
    }

    pub fn state(&self) -> ConversationState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.inner.state.subscribe()
    }

    /// Recent phase transitions, oldest first.
    pub fn transitions(&self) -> Vec<StateTransition> {
        lock(&self.inner.machine).history().to_vec()
    }

    pub fn conversation_id(&self) -> Option<String> {
        lock(&self.inner.conversation_id).clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl SessionInner {
    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ConversationState, &mut StateMachine),
    {
        self.state.send_modify(|state| {
            let mut machine = lock(&self.machine);
            f(state, &mut machine);
        });
    }

    /// Apply `f` unless `cancel` fired. The check happens under the state
    /// lock.
    fn guarded<F>(&self, cancel: &CancellationToken, f: F) -> Result<()>
    where
        F: FnOnce(&mut ConversationState, &mut StateMachine),
    {
        let mut applied = false;
        self.state.send_if_modified(|state| {
            if cancel.is_cancelled() {
                return false;
            }
            let mut machine = lock(&self.machine);
            f(state, &mut machine);
            applied = true;
            true
        });

        if applied {
            Ok(())
        } else {
            Err(ChatClientError::Cancelled)
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            log::trace!("No listener for session events");
        }
    }

    fn stage_context(&self) -> serde_json::Value {
        self.stage_context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn begin_attempt(&self) -> (u64, CancellationToken) {
        let cancel = CancellationToken::new();
        let id = self.next_attempt_id.fetch_add(1, Ordering::SeqCst);
        let previous = lock(&self.active).replace(ActiveAttempt {
            id,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            self.cancel_attempt(previous);
        }
        (id, cancel)
    }

    fn cancel_attempt(&self, attempt: ActiveAttempt) {
        attempt.cancel.cancel();
        self.update(|state, machine| {
            if machine.can_transition(&ConversationEvent::Cancelled) {
                apply_event(machine, state, ConversationEvent::Cancelled);
            }
        });
        log::info!("Cancelled attempt {}", attempt.id);
    }

    fn finish_attempt(&self, id: u64) {
        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(|attempt| attempt.id == id) {
            *active = None;
        }
    }

    async fn run_send(&self, cancel: &CancellationToken, text: String) -> TurnOutcome {
        let needs_conversation = lock(&self.conversation_id).is_none();
        let submitted = self.guarded(cancel, |state, machine| {
            state.reset_transient();
            apply_event(
                machine,
                state,
                ConversationEvent::MessageSubmitted { needs_conversation },
            );
        });
        if submitted.is_err() {
            return TurnOutcome::Cancelled;
        }

        let Some(access_token) = self.credentials.access_token() else {
            return self.fail(cancel, ChatClientError::NotAuthenticated);
        };

        let conversation_id = match self.ensure_conversation(cancel, &access_token).await {
            Ok(id) => id,
            Err(ChatClientError::Cancelled) => return TurnOutcome::Cancelled,
            Err(err) => return self.fail(cancel, err),
        };
        let adopted = self.guarded(cancel, |state, machine| {
            state.conversation_id = Some(conversation_id.clone());
            if needs_conversation {
                apply_event(
                    machine,
                    state,
                    ConversationEvent::ConversationCreated {
                        conversation_id: conversation_id.clone(),
                    },
                );
            }
        });
        if adopted.is_err() {
            return TurnOutcome::Cancelled;
        }

        let message = Message::user(text.clone());
        let request = AgentRequest {
            conversation_id,
            stage_context: self.stage_context(),
            message: Some(text),
            resume: None,
        };

        let result = self
            .stream_with_retry(cancel, &access_token, &request, Some(&message), "")
            .await;
        self.settle(cancel, result)
    }

    async fn run_resume(&self, cancel: &CancellationToken, conversation_id: String) -> TurnOutcome {
        *lock(&self.conversation_id) = Some(conversation_id.clone());
        let started = self.guarded(cancel, |state, machine| {
            state.reset_transient();
            state.conversation_id = Some(conversation_id.clone());
            apply_event(machine, state, ConversationEvent::RecoveryStarted);
        });
        if started.is_err() {
            return TurnOutcome::Cancelled;
        }

        let Some(access_token) = self.credentials.access_token() else {
            return self.fail(cancel, ChatClientError::NotAuthenticated);
        };

        let (messages, recovered, resumable) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TurnOutcome::Cancelled,
            loaded = self.load_persisted(&conversation_id) => loaded,
        };

        if !recovered.success {
            let error = recovered.error.unwrap_or_default();
            let finished = self.guarded(cancel, |state, machine| {
                state.merge_history(messages);
                apply_event(
                    machine,
                    state,
                    ConversationEvent::RecoveryFinished { is_complete: false },
                );
            });
            return match finished {
                Ok(()) => TurnOutcome::RecoveryFailed(error),
                Err(_) => TurnOutcome::Cancelled,
            };
        }

        let applied = self.guarded(cancel, |state, machine| {
            state.merge_history(messages);
            state.content = recovered.content.clone();
            state.suggestions = recovered.suggestions.clone();
            state.auto_fill_data = recovered.auto_fill_data.clone();
            state.is_complete = recovered.is_complete;
            if !resumable {
                apply_event(
                    machine,
                    state,
                    ConversationEvent::RecoveryFinished {
                        is_complete: recovered.is_complete,
                    },
                );
            }
        });
        if applied.is_err() {
            return TurnOutcome::Cancelled;
        }
        if !resumable {
            return TurnOutcome::Restored(recovered);
        }

        log::info!(
            "[{}] Resuming stream after token {:?}",
            conversation_id,
            recovered.last_token_index
        );
        let request = AgentRequest {
            conversation_id,
            stage_context: self.stage_context(),
            message: None,
            resume: Some(ResumeOptions {
                last_token_index: recovered.last_token_index,
                resume_streaming: true,
            }),
        };

        let result = self
            .stream_with_retry(cancel, &access_token, &request, None, &recovered.content)
            .await;
        self.settle(cancel, result)
    }

    /// Persisted history, recovered turn state, and whether the backend is
    /// still producing the turn.
    async fn load_persisted(&self, conversation_id: &str) -> (Vec<Message>, RecoveryResult, bool) {
        let messages = match self.store.messages(conversation_id).await {
            Ok(messages) => messages,
            Err(err) => {
                log::warn!("[{}] Could not load history: {}", conversation_id, err);
                Vec::new()
            }
        };

        let recovered = self.recovery.recover_conversation(conversation_id).await;
        let resumable = recovered.success
            && !recovered.is_complete
            && self.recovery.needs_recovery(conversation_id).await;

        (messages, recovered, resumable)
    }

    async fn ensure_conversation(
        &self,
        cancel: &CancellationToken,
        access_token: &str,
    ) -> Result<String> {
        let _creation = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatClientError::Cancelled),
            guard = self.creation.lock() => guard,
        };
        let existing = lock(&self.conversation_id).clone();
        if let Some(id) = existing {
            return Ok(id);
        }

        let created = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatClientError::Cancelled),
            created = self.backend.create_conversation(
                access_token,
                &self.config.stage_id,
                &self.config.metadata,
            ) => created,
        };
        let id = created.map_err(|err| ChatClientError::ConversationCreation(Box::new(err)))?;

        log::info!(
            "[{}] Conversation created for stage {}",
            id,
            self.config.stage_id
        );
        *lock(&self.conversation_id) = Some(id.clone());
        Ok(id)
    }

    async fn stream_with_retry(
        &self,
        cancel: &CancellationToken,
        access_token: &str,
        request: &AgentRequest,
        user_message: Option<&Message>,
        baseline: &str,
    ) -> Result<CompletedTurn> {
        self.retry
            .run(
                cancel,
                move |attempt| {
                    self.stream_attempt(
                        cancel,
                        access_token,
                        request,
                        user_message,
                        baseline,
                        attempt,
                    )
                },
                move |notice| {
                    let event = ConversationEvent::RetryScheduled {
                        next_attempt: notice.next_attempt,
                        delay_ms: notice.delay.as_millis() as u64,
                        error: notice.error.to_string(),
                    };
                    let _ = self.guarded(cancel, |state, machine| {
                        apply_event(machine, state, event);
                    });
                },
            )
            .await
    }

    async fn stream_attempt(
        &self,
        cancel: &CancellationToken,
        access_token: &str,
        request: &AgentRequest,
        user_message: Option<&Message>,
        baseline: &str,
        attempt: u32,
    ) -> Result<CompletedTurn> {
        // A retry starts from the turn's baseline, never from the failed
        // attempt's partial text.
        self.guarded(cancel, |state, machine| {
            if attempt > 1 {
                state.content = baseline.to_string();
            }
            apply_event(machine, state, ConversationEvent::StreamOpened { attempt });
        })?;

        let attempt = self.open_and_consume(cancel, access_token, request, user_message);
        if !request.is_resume() {
            return attempt.await;
        }

        let timeout = self.config.resume_timeout;
        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "[{}] Resumed stream timed out after {:?}",
                    request.conversation_id,
                    timeout
                );
                Err(ChatClientError::Timeout(timeout))
            }
        }
    }

    async fn open_and_consume(
        &self,
        cancel: &CancellationToken,
        access_token: &str,
        request: &AgentRequest,
        user_message: Option<&Message>,
    ) -> Result<CompletedTurn> {
        let events = self
            .backend
            .stream_agent_response(access_token, request)
            .await?;
        self.consume_events(cancel, events, &request.conversation_id, user_message)
            .await
    }

    /// Apply events in arrival order until `complete`. A stream that ends
    /// without `complete` is an incomplete attempt.
    async fn consume_events(
        &self,
        cancel: &CancellationToken,
        mut events: EventStream,
        conversation_id: &str,
        user_message: Option<&Message>,
    ) -> Result<CompletedTurn> {
        while let Some(event) = events.next().await {
            match event? {
                StreamEvent::Content { content } => {
                    self.guarded(cancel, |state, machine| {
                        state.content = content;
                        apply_event(machine, state, ConversationEvent::ContentReceived);
                    })?;
                }
                StreamEvent::Complete {
                    suggestions,
                    auto_fill_data,
                    stage_complete,
                } => {
                    let mut content = String::new();
                    self.guarded(cancel, |state, machine| {
                        state.suggestions = suggestions.clone();
                        state.auto_fill_data = auto_fill_data.clone();
                        state.is_complete = true;
                        if let Some(message) = user_message {
                            state.history_messages.push(message.clone());
                        }
                        apply_event(machine, state, ConversationEvent::CompleteReceived);
                        content = state.content.clone();
                    })?;

                    log::info!(
                        "[{}] Turn complete ({} chars, stage complete: {})",
                        conversation_id,
                        content.len(),
                        stage_complete
                    );
                    if let Some(data) = &auto_fill_data {
                        self.emit(SessionEvent::AutoFill(data.clone()));
                    }
                    if stage_complete {
                        self.emit(SessionEvent::StageComplete);
                    }

                    return Ok(CompletedTurn {
                        conversation_id: conversation_id.to_string(),
                        content,
                        suggestions,
                        auto_fill_data,
                        stage_complete,
                    });
                }
                StreamEvent::Error { error } => {
                    log::warn!("[{}] Agent reported error: {}", conversation_id, error);
                    return Err(ChatClientError::Agent(error));
                }
                StreamEvent::Ping => log::trace!("[{}] ping", conversation_id),
                StreamEvent::Unknown => {}
            }
        }

        log::warn!("[{}] Stream closed without complete", conversation_id);
        Err(ChatClientError::IncompleteStream)
    }

    fn settle(&self, cancel: &CancellationToken, result: Result<CompletedTurn>) -> TurnOutcome {
        match result {
            Ok(turn) => TurnOutcome::Completed(turn),
            Err(ChatClientError::Cancelled) => TurnOutcome::Cancelled,
            Err(err) => self.fail(cancel, err),
        }
    }

    /// Surface a terminal failure, unless the attempt was cancelled.
    fn fail(&self, cancel: &CancellationToken, error: ChatClientError) -> TurnOutcome {
        let message = error.user_message();
        let event = match &error {
            ChatClientError::ConversationCreation(_) => {
                ConversationEvent::ConversationCreationFailed {
                    error: message.clone(),
                }
            }
            _ => ConversationEvent::AttemptFailed {
                error: message.clone(),
            },
        };

        let surfaced = self.guarded(cancel, |state, machine| {
            state.error = Some(message);
            apply_event(machine, state, event);
        });
        match surfaced {
            Ok(()) => {
                log::error!("Turn failed: {}", error);
                TurnOutcome::Failed(error)
            }
            Err(_) => TurnOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chat_core::{CompleteResponse, Conversation, Token};

    use super::*;

    /// Creates `conv-7` and fires `cancel_on_create` while doing so.
    struct CreatingBackend {
        cancel_on_create: CancellationToken,
    }

    #[async_trait]
    impl AgentBackend for CreatingBackend {
        async fn create_conversation(
            &self,
            _access_token: &str,
            _stage_id: &str,
            _metadata: &serde_json::Value,
        ) -> Result<String> {
            self.cancel_on_create.cancel();
            Ok("conv-7".to_string())
        }

        async fn stream_agent_response(
            &self,
            _access_token: &str,
            _request: &AgentRequest,
        ) -> Result<EventStream> {
            Err(ChatClientError::IncompleteStream)
        }
    }

    #[async_trait]
    impl ConversationStore for CreatingBackend {
        async fn conversation(&self, conversation_id: &str) -> Result<Conversation> {
            Err(ChatClientError::Status {
                status: 404,
                body: conversation_id.to_string(),
            })
        }

        async fn tokens(&self, _conversation_id: &str, _after: Option<u64>) -> Result<Vec<Token>> {
            Ok(Vec::new())
        }

        async fn complete_response(&self, _conversation_id: &str) -> Result<Option<CompleteResponse>> {
            Ok(None)
        }
    }

    fn session_for(cancel_on_create: CancellationToken) -> ConversationSession {
        let backend = Arc::new(CreatingBackend { cancel_on_create });
        let (session, _events) = ConversationSession::new(
            backend.clone(),
            backend,
            Credentials::new(Some("tok".to_string())),
            SessionConfig::new("idea"),
        );
        session
    }

    #[tokio::test]
    async fn id_created_after_cancel_is_kept_out_of_state() {
        let cancel = CancellationToken::new();
        let session = session_for(cancel.clone());

        let outcome = session.inner.run_send(&cancel, "Build a todo app".to_string()).await;

        assert!(matches!(outcome, TurnOutcome::Cancelled));
        assert!(session.state().conversation_id.is_none());
        assert!(session.state().error.is_none());
        // The backend did create it, so the next send reuses it.
        assert_eq!(session.conversation_id().as_deref(), Some("conv-7"));
    }

    #[tokio::test]
    async fn waiting_for_creation_lock_is_cancellable() {
        let session = session_for(CancellationToken::new());
        let _held = session.inner.creation.lock().await;
        let cancel = CancellationToken::new();

        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            let (result, ()) = tokio::join!(
                session.inner.ensure_conversation(&cancel, "tok"),
                async {
                    tokio::task::yield_now().await;
                    cancel.cancel();
                }
            );
            result
        })
        .await;

        assert!(matches!(waited, Ok(Err(ChatClientError::Cancelled))));
        assert!(session.conversation_id().is_none());
    }
}
