use super::config::SessionConfig;
use super::state::{InputMode, SessionEvent, TurnState, VoiceSession};
use super::stats::{Counters, SessionStats};
use crate::agent::Agent;
use crate::conversation::{ConversationFilter, ConversationStore, ConversationSummary, Message, Role};
use crate::error::ChatError;
use crate::speech::{
    SpeakOutcome, SpeechClaim, SpeechInput, SpeechInputEvent, SpeechOutput, SpeechOutputEvent,
};
use crate::transport::{ChatTransport, InboundFrame, OutboundFrame, TransportEvent};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Reply currently being streamed
#[derive(Debug, Clone)]
struct StreamingReply {
    conversation_id: String,
    /// `None` when the conversation was deleted and the reply is discarded
    message_id: Option<String>,
}

#[derive(Default)]
struct TurnData {
    /// Conversations waiting for a reply, oldest first. The backend answers
    /// in order and carries no correlation id.
    awaiting: VecDeque<String>,
    streaming: Option<StreamingReply>,
    counters: Counters,
}

/// Session orchestrator
///
/// Drives the turn cycle for the focused conversation:
/// Idle → UserTurn → Sending → AgentStreaming → AgentSpeaking → Idle.
/// Owns the session's playback and recognition resources.
pub struct SessionOrchestrator {
    transport: Arc<dyn ChatTransport>,
    speech_in: Arc<SpeechInput>,
    speech_out: Arc<SpeechOutput>,
    store: Mutex<ConversationStore>,
    turn: Mutex<TurnData>,
    state_tx: watch::Sender<TurnState>,
    events: broadcast::Sender<SessionEvent>,
    auto_voice: AtomicBool,
    started_at: DateTime<Utc>,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Synthesis and playback of the latest completed reply
    reply_voice: Mutex<Option<JoinHandle<()>>>,
    this: Weak<Self>,
}

impl SessionOrchestrator {
    pub fn new(
        config: SessionConfig,
        store: ConversationStore,
        transport: Arc<dyn ChatTransport>,
        speech_in: Arc<SpeechInput>,
        speech_out: Arc<SpeechOutput>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(TurnState::Idle);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        speech_in.set_continuous(config.continuous_listening);
        speech_out.set_agent(store.focused_agent());

        info!(
            "Chat session created (agent: {}, auto-voice: {}, voice input: {})",
            store.focused_agent(),
            config.auto_voice,
            if speech_in.is_supported() { "available" } else { "unavailable" }
        );

        Arc::new_cyclic(|this| Self {
            transport,
            speech_in,
            speech_out,
            store: Mutex::new(store),
            turn: Mutex::new(TurnData::default()),
            state_tx,
            events,
            auto_voice: AtomicBool::new(config.auto_voice),
            started_at: Utc::now(),
            pump: Mutex::new(None),
            reply_voice: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Spawn the task that feeds transport and speech events into the session
    pub async fn start(self: &Arc<Self>, mut transport_events: broadcast::Receiver<TransportEvent>) {
        let mut input_events = self.speech_in.subscribe();
        let mut output_events = self.speech_out.subscribe();
        let session: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            info!("Session event pump started");

            loop {
                tokio::select! {
                    event = transport_events.recv() => match event {
                        Ok(event) => match session.upgrade() {
                            Some(session) => session.handle_transport_event(event).await,
                            None => break,
                        },
                        Err(RecvError::Lagged(skipped)) => warn!("Session missed {} transport events", skipped),
                        Err(RecvError::Closed) => break,
                    },
                    event = input_events.recv() => match event {
                        Ok(event) => match session.upgrade() {
                            Some(session) => session.handle_speech_input_event(event).await,
                            None => break,
                        },
                        Err(RecvError::Lagged(skipped)) => warn!("Session missed {} speech input events", skipped),
                        Err(RecvError::Closed) => break,
                    },
                    event = output_events.recv() => match event {
                        Ok(event) => match session.upgrade() {
                            Some(session) => session.handle_speech_output_event(event).await,
                            None => break,
                        },
                        Err(RecvError::Lagged(skipped)) => warn!("Session missed {} speech output events", skipped),
                        Err(RecvError::Closed) => break,
                    },
                }
            }

            info!("Session event pump stopped");
        });

        if let Some(previous) = self.pump.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the event pump and release voice resources
    pub async fn dispose(&self) {
        if let Some(handle) = self.pump.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.reply_voice.lock().await.take() {
            handle.abort();
        }
        self.speech_out.stop().await;
        self.speech_in.stop_listening().await;
        self.set_state(TurnState::Idle);
        info!("Chat session disposed");
    }

    pub fn state(&self) -> TurnState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<TurnState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn auto_voice(&self) -> bool {
        self.auto_voice.load(Ordering::SeqCst)
    }

    pub fn set_auto_voice(&self, enabled: bool) {
        self.auto_voice.store(enabled, Ordering::SeqCst);
        info!("Auto-voice {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn speech_input(&self) -> &Arc<SpeechInput> {
        &self.speech_in
    }

    pub fn speech_output(&self) -> &Arc<SpeechOutput> {
        &self.speech_out
    }

    pub async fn stats(&self) -> SessionStats {
        self.turn.lock().await.counters.snapshot(self.started_at)
    }

    pub async fn voice_session(&self) -> VoiceSession {
        VoiceSession {
            listening: self.speech_in.is_listening().await,
            interim_transcript: self.speech_in.interim_transcript().await,
            last_final_transcript: self.speech_in.last_final_transcript().await,
            speaking: self.speech_out.is_speaking().await,
            audio_ready: self.speech_out.has_ready_audio().await,
            auto_play_enabled: self.auto_voice() && self.speech_out.gate().has_interacted(),
        }
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    pub async fn focused_agent(&self) -> Agent {
        self.store.lock().await.focused_agent()
    }

    /// Id of the focused conversation, created on demand
    pub async fn current_conversation_id(&self) -> Result<String, ChatError> {
        let mut store = self.store.lock().await;
        let id = store.ensure_current();
        self.report_save_failure(&mut store);
        id
    }

    /// Messages of a conversation, in append order
    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        self.store
            .lock()
            .await
            .get(conversation_id)
            .map(|c| c.messages.clone())
            .ok_or_else(|| ChatError::NotFound(format!("conversation {}", conversation_id)))
    }

    pub async fn conversation_title(&self, conversation_id: &str) -> Option<String> {
        self.store
            .lock()
            .await
            .get(conversation_id)
            .map(|c| c.title.clone())
    }

    pub async fn list_conversations(&self, filter: &ConversationFilter) -> Vec<ConversationSummary> {
        self.store.lock().await.list_conversations(filter)
    }

    pub async fn rename_conversation(&self, conversation_id: &str, title: &str) -> Result<(), ChatError> {
        let mut store = self.store.lock().await;
        store.rename_conversation(conversation_id, title)?;
        self.report_save_failure(&mut store);
        Ok(())
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ChatError> {
        let was_current = {
            let mut turn = self.turn.lock().await;
            let mut store = self.store.lock().await;
            let was_current = store.current().map(|c| c.id.as_str()) == Some(conversation_id);

            store.delete_conversation(conversation_id)?;
            self.report_save_failure(&mut store);

            if let Some(reply) = turn.streaming.as_mut() {
                if reply.conversation_id == conversation_id {
                    reply.message_id = None;
                }
            }
            was_current
        };

        if was_current {
            self.speech_out.stop().await;
            self.set_state(TurnState::Idle);
        }
        Ok(())
    }

    /// Open a fresh conversation with the focused agent. Stops playback and
    /// listening; replies still in flight land in their old conversation.
    pub async fn new_chat(&self) -> Result<String, ChatError> {
        self.speech_out.stop().await;
        self.speech_in.stop_listening().await;
        self.speech_in.reset_transcripts().await;

        let id = {
            let mut store = self.store.lock().await;
            let agent = store.focused_agent();
            let id = store.create_conversation(agent)?;
            self.report_save_failure(&mut store);
            id
        };

        self.set_state(TurnState::Idle);
        info!("Started new chat {}", id);
        Ok(id)
    }

    /// Focus another agent and its active conversation
    pub async fn switch_agent(&self, agent: Agent) -> Result<String, ChatError> {
        self.speech_out.stop().await;

        let id = {
            let mut store = self.store.lock().await;
            let id = store.switch_agent(agent)?;
            self.report_save_failure(&mut store);
            id
        };
        self.speech_out.set_agent(agent);
        self.leave_turn();

        Ok(id)
    }

    /// Focus an existing conversation, possibly of another agent
    pub async fn select_conversation(&self, conversation_id: &str) -> Result<Agent, ChatError> {
        self.speech_out.stop().await;

        let agent = {
            let mut store = self.store.lock().await;
            let agent = store.activate(conversation_id)?;
            self.report_save_failure(&mut store);
            agent
        };
        self.speech_out.set_agent(agent);
        self.leave_turn();

        Ok(agent)
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    pub fn begin_typing(&self) {
        self.speech_out.gate().mark_interacted();
        self.transition(|s| s == TurnState::Idle, TurnState::UserTurn(InputMode::Typing));
    }

    /// Start voice capture. Returns false when voice input is unavailable.
    pub async fn start_voice_input(&self) -> bool {
        self.speech_out.gate().mark_interacted();

        if !self.speech_in.is_supported() {
            self.emit(SessionEvent::VoiceUnavailable(
                "speech recognition is not supported".to_string(),
            ));
            return false;
        }

        if !self.state().accepts_input() {
            debug!("Voice input ignored while waiting for a reply");
            return false;
        }

        if self.state() == TurnState::AgentSpeaking {
            self.speech_out.stop().await;
        }

        // A failed start is reported through the speech input events
        if !self.speech_in.start_listening().await {
            return false;
        }

        self.transition(
            |s| s.accepts_input(),
            TurnState::UserTurn(InputMode::Listening),
        );
        true
    }

    pub async fn stop_voice_input(&self) {
        self.speech_in.stop_listening().await;
        self.transition(
            |s| s == TurnState::UserTurn(InputMode::Listening),
            TurnState::Idle,
        );
    }

    /// Send a user message to the focused agent.
    ///
    /// Blank input is rejected without touching the session. Send failures
    /// are recorded in the conversation as a system message.
    pub async fn submit_text(&self, text: &str) -> Result<(), ChatError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(ChatError::Validation("message is empty".to_string()));
        }

        let state = self.state();
        if !state.accepts_input() {
            return Err(ChatError::Validation(
                "still waiting for the agent's reply".to_string(),
            ));
        }

        if !self.transport.is_connected() {
            return Err(ChatError::Connection("offline".to_string()));
        }

        self.speech_out.gate().mark_interacted();
        if state == TurnState::AgentSpeaking || self.speech_out.is_speaking().await {
            self.speech_out.stop().await;
        }

        let (conversation_id, agent) = {
            let mut turn = self.turn.lock().await;
            let mut store = self.store.lock().await;
            let agent = store.focused_agent();
            let conversation_id = store.ensure_current()?;

            store.append_message(&conversation_id, Message::user(content))?;
            self.report_save_failure(&mut store);
            turn.awaiting.push_back(conversation_id.clone());
            turn.counters.messages_sent += 1;
            (conversation_id, agent)
        };

        self.set_state(TurnState::Sending);

        match self
            .transport
            .send(OutboundFrame::user_message(content, agent))
            .await
        {
            Ok(()) => {
                info!("Sent message to {} ({})", agent, conversation_id);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to send message to {}: {}", agent, e);
                self.fail_conversation(
                    &conversation_id,
                    &format!("Could not reach {}: {}", agent, e),
                )
                .await;
                Err(e)
            }
        }
    }

    pub async fn stop_speaking(&self) {
        self.speech_out.stop().await;
        self.transition(|s| s == TurnState::AgentSpeaking, TurnState::Idle);
    }

    /// Manually play the latest reply of the focused conversation.
    /// Returns false when there is nothing to play.
    pub async fn play_last_reply(&self) -> Result<bool, ChatError> {
        self.speech_out.gate().mark_interacted();

        if self.speech_out.play_ready().await {
            self.transition(|s| s == TurnState::Idle, TurnState::AgentSpeaking);
            return Ok(true);
        }

        let text = {
            let store = self.store.lock().await;
            store
                .current()
                .and_then(|c| c.last_assistant_message())
                .filter(|m| !m.is_streaming)
                .map(|m| m.content.clone())
        };

        let Some(text) = text else {
            return Ok(false);
        };

        match self.speech_out.speak(&text, true).await {
            Ok(SpeakOutcome::Playing) => {
                self.transition(|s| s == TurnState::Idle, TurnState::AgentSpeaking);
                self.turn.lock().await.counters.replies_spoken += 1;
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(e) => {
                self.emit(SessionEvent::VoiceUnavailable(e.to_string()));
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------

    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.emit(SessionEvent::Online),
            TransportEvent::Close => {
                self.emit(SessionEvent::Offline);
                self.fail_outstanding("Connection to the agent was lost. Please try again.")
                    .await;
            }
            TransportEvent::Error(message) => {
                debug!("Transport error: {}", message);
                self.fail_outstanding(&format!("Connection error: {}", message))
                    .await;
            }
            TransportEvent::Message(frame) => {
                if let Err(e) = self.handle_frame(frame).await {
                    error!("Failed to handle frame: {}", e);
                }
            }
        }
    }

    pub async fn handle_speech_input_event(&self, event: SpeechInputEvent) {
        match event {
            SpeechInputEvent::Final { text, confidence } => {
                if text.trim().is_empty() {
                    return;
                }
                debug!("Submitting voice transcript ({:.2})", confidence);
                if let Err(e) = self.submit_text(&text).await {
                    warn!("Voice transcript not sent: {}", e);
                }
            }
            SpeechInputEvent::Error(message) => {
                self.emit(SessionEvent::VoiceUnavailable(message));
                self.transition(
                    |s| s == TurnState::UserTurn(InputMode::Listening),
                    TurnState::Idle,
                );
            }
            SpeechInputEvent::Stopped => {
                self.transition(
                    |s| s == TurnState::UserTurn(InputMode::Listening),
                    TurnState::Idle,
                );
            }
            SpeechInputEvent::Started | SpeechInputEvent::Interim(_) => {}
        }
    }

    pub async fn handle_speech_output_event(&self, event: SpeechOutputEvent) {
        match event {
            SpeechOutputEvent::Finished { .. } | SpeechOutputEvent::Stopped => {
                // A newer clip may already be playing
                if !self.speech_out.is_speaking().await {
                    self.transition(|s| s == TurnState::AgentSpeaking, TurnState::Idle);
                }
            }
            SpeechOutputEvent::Failed { message } => {
                self.emit(SessionEvent::VoiceUnavailable(message));
                if !self.speech_out.is_speaking().await {
                    self.transition(|s| s == TurnState::AgentSpeaking, TurnState::Idle);
                }
            }
            SpeechOutputEvent::Started { .. } | SpeechOutputEvent::Ready { .. } => {}
        }
    }

    async fn handle_frame(&self, frame: InboundFrame) -> Result<(), ChatError> {
        match frame {
            InboundFrame::AgentResponse { message, done, .. } => {
                let result = self.handle_reply_chunk(&message, done).await;
                if let Err(e) = &result {
                    self.fail_outstanding(&format!("The reply could not be recorded: {}", e))
                        .await;
                }
                result
            }
            InboundFrame::AudioUrl { url, .. } => {
                let turn = self.turn.lock().await;
                let mut store = self.store.lock().await;
                let target = match turn.streaming.as_ref().map(|r| r.conversation_id.clone()) {
                    Some(id) => id,
                    None => store.ensure_current()?,
                };
                store.set_audio_reference(&target, &url)?;
                self.report_save_failure(&mut store);
                Ok(())
            }
            InboundFrame::Error { message } => {
                warn!("Agent backend reported an error: {}", message);
                if self.fail_outstanding(&message).await {
                    return Ok(());
                }
                let id = {
                    let mut store = self.store.lock().await;
                    let id = store.ensure_current()?;
                    store.append_message(&id, Message::system(message.clone()))?;
                    self.report_save_failure(&mut store);
                    id
                };
                self.emit(SessionEvent::SystemMessage {
                    conversation_id: id,
                    content: message,
                });
                Ok(())
            }
            InboundFrame::Status { status, message } => {
                let text = message.unwrap_or(status);
                debug!("Backend status: {}", text);
                self.emit(SessionEvent::Status(text));
                Ok(())
            }
        }
    }

    async fn handle_reply_chunk(&self, chunk: &str, done: bool) -> Result<(), ChatError> {
        let (conversation_id, content, focused) = {
            let mut turn = self.turn.lock().await;
            let mut store = self.store.lock().await;

            let reply = match turn.streaming.take() {
                Some(reply) => reply,
                None => {
                    let conversation_id = match turn.awaiting.pop_front() {
                        Some(id) => id,
                        None => store.ensure_current()?,
                    };

                    let message_id = if store.get(&conversation_id).is_some() {
                        let message = Message::streaming(Role::Assistant);
                        let message_id = message.id.clone();
                        store.append_message(&conversation_id, message)?;
                        Some(message_id)
                    } else {
                        warn!("Discarding reply for deleted conversation {}", conversation_id);
                        None
                    };

                    StreamingReply {
                        conversation_id,
                        message_id,
                    }
                }
            };

            self.report_save_failure(&mut store);

            let focused = store.active_conversation_id(store.focused_agent())
                == Some(reply.conversation_id.as_str());

            // Keep the reply tracked on failure so the turn can be closed
            if let Some(message_id) = reply.message_id.as_deref() {
                if let Err(e) = store.append_chunk(&reply.conversation_id, message_id, chunk) {
                    turn.streaming = Some(reply);
                    return Err(e);
                }
            }

            if focused {
                self.transition(|s| s == TurnState::Sending, TurnState::AgentStreaming);
            }

            if !done {
                turn.streaming = Some(reply);
                return Ok(());
            }

            let Some(message_id) = reply.message_id.as_deref() else {
                return Ok(());
            };
            let content = match store.finish_message(&reply.conversation_id, message_id) {
                Ok(content) => content,
                Err(e) => {
                    turn.streaming = Some(reply);
                    return Err(e);
                }
            };
            self.report_save_failure(&mut store);
            turn.counters.replies_received += 1;

            (reply.conversation_id, content, focused)
        };

        info!("Reply complete in {}", conversation_id);
        self.emit(SessionEvent::ReplyCompleted {
            conversation_id,
            content: content.clone(),
        });

        if focused && self.state().awaiting_reply() {
            self.finish_turn(content).await;
        }
        Ok(())
    }

    /// Speak the completed reply when auto-voice is on, else go idle.
    /// Speech runs on its own task; the event pump never waits on synthesis.
    async fn finish_turn(&self, content: String) {
        if !self.auto_voice() || content.trim().is_empty() {
            self.transition(|s| s.awaiting_reply(), TurnState::Idle);
            return;
        }

        let Some(session) = self.this.upgrade() else {
            return;
        };
        self.set_state(TurnState::AgentSpeaking);

        // Claimed here so a stop issued before the task runs still wins
        let claim = self.speech_out.claim().await;
        let handle = tokio::spawn(async move { session.speak_reply(claim, &content).await });
        *self.reply_voice.lock().await = Some(handle);
    }

    async fn speak_reply(&self, claim: SpeechClaim, content: &str) {
        match self.speech_out.speak_claimed(claim, content, true).await {
            Ok(SpeakOutcome::Playing) => {
                self.turn.lock().await.counters.replies_spoken += 1;
            }
            Ok(SpeakOutcome::Ready) | Ok(SpeakOutcome::Superseded) => {
                self.transition(|s| s == TurnState::AgentSpeaking, TurnState::Idle);
            }
            Err(e) => {
                self.emit(SessionEvent::VoiceUnavailable(e.to_string()));
                self.transition(|s| s == TurnState::AgentSpeaking, TurnState::Idle);
            }
        }
    }

    /// Close every outstanding turn with a system message.
    /// Returns true when at least one turn was affected.
    async fn fail_outstanding(&self, reason: &str) -> bool {
        let affected = {
            let mut turn = self.turn.lock().await;
            let mut store = self.store.lock().await;
            let mut affected: Vec<String> = Vec::new();

            if let Some(reply) = turn.streaming.take() {
                if let Some(message_id) = reply.message_id.as_deref() {
                    if let Err(e) = store.finish_message(&reply.conversation_id, message_id) {
                        warn!("Could not close interrupted reply: {}", e);
                    }
                }
                affected.push(reply.conversation_id);
            }

            for id in turn.awaiting.drain(..).collect::<Vec<_>>() {
                if !affected.contains(&id) {
                    affected.push(id);
                }
            }

            affected.retain(|id| store.get(id).is_some());
            for id in &affected {
                if let Err(e) = store.append_message(id, Message::system(reason)) {
                    warn!("Could not record error in {}: {}", id, e);
                }
            }
            self.report_save_failure(&mut store);
            turn.counters.errors += affected.len();
            affected
        };

        for id in &affected {
            self.emit(SessionEvent::SystemMessage {
                conversation_id: id.clone(),
                content: reason.to_string(),
            });
        }

        self.transition(|s| s.awaiting_reply(), TurnState::Idle);
        !affected.is_empty()
    }

    /// Close the turn of one conversation whose send failed
    async fn fail_conversation(&self, conversation_id: &str, reason: &str) {
        {
            let mut turn = self.turn.lock().await;
            let mut store = self.store.lock().await;

            if let Some(pos) = turn.awaiting.iter().rposition(|id| id == conversation_id) {
                turn.awaiting.remove(pos);
            }
            if let Err(e) = store.append_message(conversation_id, Message::system(reason)) {
                warn!("Could not record error in {}: {}", conversation_id, e);
            }
            self.report_save_failure(&mut store);
            turn.counters.errors += 1;
        }

        self.emit(SessionEvent::SystemMessage {
            conversation_id: conversation_id.to_string(),
            content: reason.to_string(),
        });
        self.transition(|s| s.awaiting_reply(), TurnState::Idle);
    }

    /// Leave whatever turn the previous conversation was in
    fn leave_turn(&self) {
        self.transition(
            |s| !matches!(s, TurnState::UserTurn(_)),
            TurnState::Idle,
        );
    }

    /// Tell the front-end when history could not be written to disk
    fn report_save_failure(&self, store: &mut ConversationStore) {
        if let Some(e) = store.take_save_error() {
            self.emit(SessionEvent::StorageUnavailable(e.to_string()));
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: TurnState) {
        self.transition(|_| true, next);
    }

    fn transition(&self, from: impl Fn(TurnState) -> bool, to: TurnState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == to || !from(*state) {
                return false;
            }
            debug!("Turn state {:?} -> {:?}", state, to);
            *state = to;
            true
        })
    }
}
