//! Session controller - runs one user turn per conversation
//!
//! A turn appends the user message optimistically, sends the budgeted history
//! through the [`ChatTransport`], folds the streamed reply with a
//! [`ResponseAggregator`] and commits the assistant message. Cancellation keeps
//! the user message and commits nothing; a transport failure rolls the user
//! message back.

use std::sync::Arc;

use chat_core::budget::fit_to_budget_report;
use chat_core::{Conversation, Message, MessageAttachment, WireMessage};
use chat_state::{StateMachine, TurnEvent};
use chat_stream::{
    ByteStream, ChatRequest, ChatResponse, ChatTransport, SseParser, Suggestion, TransportError,
};
use conversation_store::{ConversationStore, KeyValueStore};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::stream::{LiveTurn, ResponseAggregator};

/// Agentic execution flags forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgenticOptions {
    pub selected_tools: Vec<String>,
    pub max_iterations: Option<u32>,
}

/// A new user message and its request options.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub content: String,
    pub attachments: Vec<MessageAttachment>,
    /// Overrides the configured persona for this turn.
    pub persona_mode: Option<String>,
    pub agentic: Option<AgenticOptions>,
}

impl Submission {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<MessageAttachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_persona_mode(mut self, persona_mode: impl Into<String>) -> Self {
        self.persona_mode = Some(persona_mode.into());
        self
    }

    pub fn with_agentic(mut self, selected_tools: Vec<String>, max_iterations: Option<u32>) -> Self {
        self.agentic = Some(AgenticOptions {
            selected_tools,
            max_iterations,
        });
        self
    }
}

/// How a turn ended, when it didn't fail.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Committed {
        /// Final id of the user message (server-confirmed when reported).
        user_message_id: String,
        message: Message,
        suggestions: Vec<Suggestion>,
    },
    Cancelled {
        user_message_id: String,
    },
}

struct ActiveTurn {
    cancel: CancellationToken,
    live: watch::Receiver<LiveTurn>,
}

/// Releases the conversation's turn slot on every exit path.
struct TurnSlot<'a> {
    active: &'a DashMap<String, ActiveTurn>,
    conversation_id: String,
}

impl Drop for TurnSlot<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.conversation_id);
    }
}

enum StreamOutcome {
    Finished(ResponseAggregator),
    Cancelled,
    Failed(TransportError),
}

/// Per-turn mutable pieces threaded through the phases.
struct Turn<'a> {
    conversation_id: &'a str,
    user_message_id: String,
    machine: StateMachine,
    live: watch::Sender<LiveTurn>,
    cancel: CancellationToken,
}

impl Turn<'_> {
    fn publish(&self, mut live: LiveTurn) {
        live.phase = self.machine.state().clone();
        self.live.send_replace(live);
    }

    fn publish_phase(&self) {
        let phase = self.machine.state().clone();
        self.live.send_modify(|live| live.phase = phase);
    }
}

pub struct SessionController<S: KeyValueStore> {
    store: Arc<ConversationStore<S>>,
    transport: Arc<dyn ChatTransport>,
    config: SessionConfig,
    active: DashMap<String, ActiveTurn>,
}

impl<S: KeyValueStore> SessionController<S> {
    pub fn new(
        store: Arc<ConversationStore<S>>,
        transport: Arc<dyn ChatTransport>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            active: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore<S>> {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_turn_active(&self, conversation_id: &str) -> bool {
        self.active.contains_key(conversation_id)
    }

    /// Cancel the active turn of a conversation. Returns `false` when none runs.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.active.get(conversation_id) {
            Some(turn) => {
                log::info!("[{}] Cancelling active turn", conversation_id);
                turn.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Watch the live state of the active turn of a conversation.
    pub fn subscribe(&self, conversation_id: &str) -> Option<watch::Receiver<LiveTurn>> {
        self.active
            .get(conversation_id)
            .map(|turn| turn.live.clone())
    }

    /// Run one user turn to completion, cancellation or failure.
    pub async fn submit(&self, conversation_id: &str, submission: Submission) -> Result<TurnOutcome> {
        let cancel = CancellationToken::new();
        let (live_tx, live_rx) = watch::channel(LiveTurn::default());
        let _slot = self.claim_slot(conversation_id, cancel.clone(), live_rx)?;

        let conversation = self.store.get(conversation_id).await?;

        let user_message = Message::user(submission.content.clone())
            .with_temporary_id()
            .with_attachments(submission.attachments.clone());
        let request = self.build_request(&conversation, &user_message, &submission);

        let mut turn = Turn {
            conversation_id,
            user_message_id: user_message.id.clone(),
            machine: StateMachine::new(),
            live: live_tx,
            cancel,
        };

        self.store
            .append_message(conversation_id, user_message)
            .await?;
        turn.machine.try_handle_event(TurnEvent::UserSubmitted)?;
        turn.publish_phase();

        log::info!(
            "[{}] Sending turn with {} messages (stream={})",
            conversation_id,
            request.messages.len(),
            request.stream
        );

        let response = tokio::select! {
            biased;
            _ = turn.cancel.cancelled() => return self.cancel_turn(&mut turn),
            response = self.transport.send(&request) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => return Err(self.fail_turn(&mut turn, e).await),
        };

        turn.machine.try_handle_event(TurnEvent::ResponseStarted)?;
        turn.publish_phase();

        let (mut aggregator, confirmed_id) = match response {
            ChatResponse::Complete(completion) => {
                log::debug!("[{}] Received complete response", conversation_id);
                (
                    ResponseAggregator::from_completion(&completion),
                    completion.user_message_id,
                )
            }
            ChatResponse::Stream {
                body,
                user_message_id,
            } => match self.consume_stream(&mut turn, body).await {
                StreamOutcome::Finished(aggregator) => (aggregator, user_message_id),
                StreamOutcome::Cancelled => return self.cancel_turn(&mut turn),
                StreamOutcome::Failed(e) => return Err(self.fail_turn(&mut turn, e).await),
            },
        };

        if turn.cancel.is_cancelled() {
            return self.cancel_turn(&mut turn);
        }

        self.commit_turn(&mut turn, &mut aggregator, confirmed_id)
            .await
    }

    fn claim_slot(
        &self,
        conversation_id: &str,
        cancel: CancellationToken,
        live: watch::Receiver<LiveTurn>,
    ) -> Result<TurnSlot<'_>> {
        match self.active.entry(conversation_id.to_string()) {
            Entry::Occupied(_) => {
                log::warn!("[{}] Rejecting submit: turn in progress", conversation_id);
                Err(SessionError::TurnInProgress(conversation_id.to_string()))
            }
            Entry::Vacant(entry) => {
                entry.insert(ActiveTurn { cancel, live });
                Ok(TurnSlot {
                    active: &self.active,
                    conversation_id: conversation_id.to_string(),
                })
            }
        }
    }

    fn build_request(
        &self,
        conversation: &Conversation,
        user_message: &Message,
        submission: &Submission,
    ) -> ChatRequest {
        let mut history: Vec<WireMessage> = Vec::with_capacity(conversation.messages.len() + 2);
        if let Some(prompt) = &self.config.system_prompt {
            history.push(WireMessage::new(chat_core::Role::System, prompt.clone()));
        }
        history.extend(conversation.messages.iter().map(Message::to_wire));
        history.push(user_message.to_wire());

        // The new user message always survives truncation.
        let (messages, report) = fit_to_budget_report(
            self.config.token_counter.as_ref(),
            &history,
            self.config.max_context_tokens,
            self.config.min_keep_recent.max(1),
        );

        if report.truncation_occurred() {
            log::info!(
                "[{}] History truncated: removed {} messages ({} -> {} tokens, limit {})",
                conversation.id,
                report.messages_removed,
                report.tokens_before,
                report.tokens_after,
                report.budget_limit
            );
        }

        let persona_mode = submission
            .persona_mode
            .clone()
            .or_else(|| self.config.persona_mode.clone())
            .or_else(|| conversation.persona_mode.clone());

        let request = ChatRequest::new(messages)
            .with_stream(self.config.stream)
            .with_persona_mode(persona_mode);

        match &submission.agentic {
            Some(agentic) => {
                request.with_agentic(agentic.selected_tools.clone(), agentic.max_iterations)
            }
            None => request,
        }
    }

    async fn consume_stream(&self, turn: &mut Turn<'_>, mut body: ByteStream) -> StreamOutcome {
        let mut parser = SseParser::new();
        let mut aggregator = ResponseAggregator::new();
        let mut chunk_count = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = turn.cancel.cancelled() => return StreamOutcome::Cancelled,
                next = body.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    chunk_count += 1;
                    turn.machine.handle_event(TurnEvent::ChunkReceived);

                    for event in parser.feed_bytes(&bytes) {
                        if turn.cancel.is_cancelled() {
                            return StreamOutcome::Cancelled;
                        }
                        aggregator.apply(event);
                        if aggregator.is_complete() {
                            break;
                        }
                    }

                    turn.publish(aggregator.snapshot());

                    if aggregator.is_complete() {
                        log::debug!(
                            "[{}] Stream done after {} chunks",
                            turn.conversation_id,
                            chunk_count
                        );
                        return StreamOutcome::Finished(aggregator);
                    }
                }
                Some(Err(e)) => {
                    log::warn!("[{}] Stream error: {}", turn.conversation_id, e);
                    return StreamOutcome::Failed(e);
                }
                None => {
                    for event in parser.finish() {
                        if turn.cancel.is_cancelled() {
                            return StreamOutcome::Cancelled;
                        }
                        aggregator.apply(event);
                    }
                    log::debug!(
                        "[{}] Stream ended after {} chunks",
                        turn.conversation_id,
                        chunk_count
                    );
                    return StreamOutcome::Finished(aggregator);
                }
            }
        }
    }

    async fn commit_turn(
        &self,
        turn: &mut Turn<'_>,
        aggregator: &mut ResponseAggregator,
        confirmed_id: Option<String>,
    ) -> Result<TurnOutcome> {
        let suggestions = aggregator.state().suggestions.clone();
        let Some(message) = aggregator.commit() else {
            return Err(SessionError::Transition(
                chat_state::TransitionError::TerminalState(turn.machine.state().clone()),
            ));
        };

        self.store
            .append_message(turn.conversation_id, message.clone())
            .await?;

        if let Some(confirmed_id) = confirmed_id.filter(|id| !id.is_empty()) {
            match self
                .store
                .replace_message_id(turn.conversation_id, &turn.user_message_id, &confirmed_id)
                .await
            {
                Ok(()) => turn.user_message_id = confirmed_id,
                Err(e) => log::warn!(
                    "[{}] Could not reconcile user message id {}: {}",
                    turn.conversation_id,
                    turn.user_message_id,
                    e
                ),
            }
        }

        turn.machine.try_handle_event(TurnEvent::ResponseCompleted)?;
        turn.publish(aggregator.snapshot());

        log::info!(
            "[{}] Committed assistant message {} ({} chars)",
            turn.conversation_id,
            message.id,
            message.content.len()
        );

        Ok(TurnOutcome::Committed {
            user_message_id: turn.user_message_id.clone(),
            message,
            suggestions,
        })
    }

    fn cancel_turn(&self, turn: &mut Turn<'_>) -> Result<TurnOutcome> {
        turn.machine.try_handle_event(TurnEvent::UserCancelled)?;
        turn.publish_phase();

        log::info!("[{}] Turn cancelled, nothing committed", turn.conversation_id);

        Ok(TurnOutcome::Cancelled {
            user_message_id: turn.user_message_id.clone(),
        })
    }

    async fn fail_turn(&self, turn: &mut Turn<'_>, error: TransportError) -> SessionError {
        log::warn!(
            "[{}] Turn failed, rolling back user message {}: {}",
            turn.conversation_id,
            turn.user_message_id,
            error
        );

        if let Err(e) = self
            .store
            .remove_message(turn.conversation_id, &turn.user_message_id)
            .await
        {
            log::warn!("[{}] Rollback failed: {}", turn.conversation_id, e);
        }

        turn.machine.handle_event(TurnEvent::TransportFailed {
            error: error.to_string(),
        });
        turn.publish(LiveTurn {
            error: Some(format!("Failed to send message: {}", error)),
            ..LiveTurn::default()
        });

        SessionError::Transport(error)
    }
}
