//! Session Protocol Engine
//!
//! Owns one realtime session: the connection state machine, dispatch of
//! decoded server frames, audio reassembly, captions and the conversation log.
//!
//! # Serialization
//!
//! Everything reaches the engine as an [`Input`] through one queue: caller
//! commands, transport events, deadlines and microphone frames. `handle()`
//! processes them one at a time, so two frames of the same response can never
//! be interleaved.
//!
//! # Collaborators
//!
//! - [`Transport`]: dials and carries text frames
//! - [`AudioSink`]: plays reassembled assistant audio
//! - [`EffectRunner`]: deadlines and microphone capture
//! - [`Notification`] channel: everything a UI needs to render

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::audio::AudioSink;
use crate::conversation::{ConversationLog, ConversationTurn, Speaker};
use crate::effects::EffectRunner;
use crate::state_machine::{reduce, ConnectionState, Effect, Event, State};
use crate::streaming::protocol::ResponseInfo;
use crate::streaming::{
    Acceptance, AudioReassembler, ClientMessage, ConnectRequest, ServerMessage, SessionConfig,
    StreamingError, TranscriptAggregator, Transport, TransportEvent, TransportEvents,
};

/// Everything the engine reacts to
#[derive(Debug)]
pub enum Input {
    /// Open a session; `reply` is settled once the transport is up or failed
    Connect {
        reply: Option<oneshot::Sender<Result<(), StreamingError>>>,
    },
    Disconnect,
    /// Event from the transport opened for `attempt`
    Transport {
        attempt: Uuid,
        event: TransportEvent,
    },
    /// A stage deadline elapsed
    Timeout {
        attempt: Uuid,
        stage: ConnectionState,
    },
    /// One PCM16 24kHz mono frame from the capture pump
    MicFrame {
        attempt: Uuid,
        samples: Vec<i16>,
    },
    /// Microphone level in 0.0..=1.0
    AudioLevel(f32),
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    /// Stop the session loop
    Shutdown,
}

/// Typed notifications for UI collaborators
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Notification {
    StatusChanged(ConnectionState),
    AudioLevel(f32),
    /// First audible chunk of an assistant response
    AssistantSpeakingStarted,
    UserStartedSpeaking,
    /// Completed user utterance
    InputTextUpdated(String),
    /// Completed assistant response
    OutputTextUpdated(String),
    /// Live preview of the utterance in progress
    LiveCaption { speaker: Speaker, text: String },
    Error(String),
}

/// Diagnostics counters for one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_received: u64,
    pub malformed_frames: u64,
    pub ignored_frames: u64,
    pub server_errors: u64,
    pub audio_chunks_played: u64,
    /// Stale, duplicate or flushed fragments
    pub audio_fragments_dropped: u64,
    pub mic_frames_sent: u64,
}

/// Point-in-time view of the session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub status: ConnectionState,
    pub session_id: Option<String>,
    pub turns: Vec<ConversationTurn>,
    pub stats: SessionStats,
}

pub struct SessionEngine {
    state: State,
    request: ConnectRequest,
    session_config: SessionConfig,
    transport: Box<dyn Transport>,
    sink: Box<dyn AudioSink>,
    runner: Arc<dyn EffectRunner>,
    /// Loop-back for transport events and runner completions
    inputs: mpsc::UnboundedSender<Input>,
    notifications: mpsc::UnboundedSender<Notification>,

    reassembler: AudioReassembler,
    assistant_caption: TranscriptAggregator,
    user_caption: TranscriptAggregator,
    log: ConversationLog,

    pending_connect: Option<oneshot::Sender<Result<(), StreamingError>>>,
    /// Response currently being played
    response_id: Option<String>,
    /// Response interrupted by the last barge-in
    cancelled_response: Option<String>,
    /// Set by barge-in; cleared once a fragment provably starts a new response
    awaiting_new_response: bool,
    /// Turn for which AssistantSpeakingStarted was already sent
    speaking_turn: Option<u64>,
    stats: SessionStats,
}

impl SessionEngine {
    pub fn new(
        request: ConnectRequest,
        session_config: SessionConfig,
        transport: Box<dyn Transport>,
        sink: Box<dyn AudioSink>,
        runner: Arc<dyn EffectRunner>,
        inputs: mpsc::UnboundedSender<Input>,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notifications, notification_rx) = mpsc::unbounded_channel();
        let engine = Self {
            state: State::default(),
            request,
            session_config,
            transport,
            sink,
            runner,
            inputs,
            notifications,
            reassembler: AudioReassembler::new(),
            assistant_caption: TranscriptAggregator::new(),
            user_caption: TranscriptAggregator::new(),
            log: ConversationLog::new(),
            pending_connect: None,
            response_id: None,
            cancelled_response: None,
            awaiting_new_response: false,
            speaking_turn: None,
            stats: SessionStats::default(),
        };
        (engine, notification_rx)
    }

    pub fn status(&self) -> ConnectionState {
        self.state.status()
    }

    pub fn conversation(&self) -> &ConversationLog {
        &self.log
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Assistant audio fragments waiting for an earlier index
    pub fn pending_audio(&self) -> usize {
        self.reassembler.pending_len()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.state.status(),
            session_id: self.state.session_id().map(str::to_owned),
            turns: self.log.all().to_vec(),
            stats: self.stats.clone(),
        }
    }

    /// Take the conversation out of the engine, leaving an empty log
    pub fn take_conversation(&mut self) -> ConversationLog {
        std::mem::take(&mut self.log)
    }

    /// Process one input. Returns false once the loop should stop.
    pub fn handle(&mut self, input: Input) -> bool {
        match input {
            Input::Connect { reply } => self.connect(reply),
            Input::Disconnect => self.disconnect(),
            Input::Transport { attempt, event } => self.handle_transport_event(attempt, event),
            Input::Timeout { attempt, stage } => {
                self.dispatch(Event::StageTimeout { attempt, stage })
            }
            Input::MicFrame { attempt, samples } => self.send_mic_frame(attempt, &samples),
            Input::AudioLevel(level) => {
                // Meter reads zero outside Active
                let level = if self.status() == ConnectionState::Active {
                    level
                } else {
                    0.0
                };
                self.notify(Notification::AudioLevel(level));
            }
            Input::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Input::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    /// Start a session. Rejected with `Busy` unless Idle.
    pub fn connect(&mut self, reply: Option<oneshot::Sender<Result<(), StreamingError>>>) {
        let status = self.status();
        if status != ConnectionState::Idle {
            log::warn!("connect() ignored: session is {}", status);
            if let Some(reply) = reply {
                let _ = reply.send(Err(StreamingError::Busy(status)));
            }
            return;
        }

        self.pending_connect = reply;
        self.dispatch(Event::Connect);
    }

    /// End the session. Safe in any state.
    pub fn disconnect(&mut self) {
        self.dispatch(Event::Disconnect);
    }

    fn shutdown(&mut self) {
        if self.status() != ConnectionState::Idle {
            log::info!("Shutting down with session {}", self.status());
            self.dispatch(Event::Disconnect);
        }
        if let Err(e) = self.sink.finish() {
            log::warn!("Failed to finish audio output: {}", e);
        }
    }

    fn handle_transport_event(&mut self, attempt: Uuid, event: TransportEvent) {
        if self.state.attempt() != Some(attempt) {
            log::debug!("Dropping event from stale transport {}: {:?}", attempt, event);
            return;
        }

        match event {
            TransportEvent::Connected => self.dispatch(Event::TransportConnected { attempt }),
            TransportEvent::Text(text) => self.handle_frame(&text),
            TransportEvent::Closed { reason } => {
                log::info!("Transport closed: {}", reason);
                self.dispatch(Event::TransportClosed { attempt, reason })
            }
            TransportEvent::Failed { reason } => {
                log::warn!("Transport failed: {}", reason);
                self.dispatch(Event::TransportFailed { attempt, reason })
            }
        }
    }

    /// Decode and dispatch one inbound text frame
    fn handle_frame(&mut self, text: &str) {
        self.stats.frames_received += 1;

        let msg = match ServerMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Discarding malformed frame: {}", e);
                self.stats.malformed_frames += 1;
                return;
            }
        };

        match msg {
            ServerMessage::SessionCreated { .. } => {
                let session_id = msg.session_id().map(str::to_owned);
                log::info!("Session created: {:?}", session_id);
                self.dispatch(Event::SessionCreated { session_id });
            }
            ServerMessage::SessionUpdated { .. } => {
                log::info!("Session configured");
                self.dispatch(Event::SessionUpdated);
            }
            ServerMessage::Error { error } => {
                self.stats.server_errors += 1;
                log::warn!(
                    "Server error ({}{}): {}",
                    error.error_type,
                    error
                        .code
                        .as_deref()
                        .map(|c| format!("/{}", c))
                        .unwrap_or_default(),
                    error.message
                );
            }
            ServerMessage::Unknown => {
                self.stats.ignored_frames += 1;
                log::debug!("Ignoring unhandled frame type");
            }
            payload => {
                if self.status() != ConnectionState::Active {
                    self.stats.ignored_frames += 1;
                    log::debug!("Ignoring payload frame while {}", self.status());
                    return;
                }
                self.handle_payload(payload);
            }
        }
    }

    fn handle_payload(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::SpeechStarted { .. } => self.barge_in(),
            ServerMessage::SpeechStopped { .. } => {
                log::debug!("User stopped speaking");
            }
            ServerMessage::ResponseCreated { response } => {
                let id = response.and_then(|r| r.id);
                log::debug!("Response created: {:?}", id);
                self.begin_response(id);
            }
            ServerMessage::AudioDelta {
                delta,
                index,
                response_id,
            } => self.accept_audio(&delta, index, response_id),
            ServerMessage::AudioTranscriptDelta { delta, response_id } => {
                if self.awaiting_new_response
                    && response_id.is_some()
                    && response_id == self.cancelled_response
                {
                    return;
                }
                let text = self
                    .assistant_caption
                    .process_delta(response_id.as_deref(), &delta)
                    .to_string();
                self.notify(Notification::LiveCaption {
                    speaker: Speaker::Assistant,
                    text,
                });
            }
            ServerMessage::InputTranscriptDelta { delta } => {
                let text = self.user_caption.process_delta(None, &delta).to_string();
                self.notify(Notification::LiveCaption {
                    speaker: Speaker::User,
                    text,
                });
            }
            ServerMessage::InputTranscriptCompleted { transcript } => {
                self.user_caption.process_completed(&transcript);
                self.log.append(Speaker::User, transcript.clone());
                log::info!("User turn completed ({} chars)", transcript.len());
                self.notify(Notification::InputTextUpdated(transcript));
            }
            ServerMessage::ResponseDone { response } => self.complete_response(response),
            // Routed in handle_frame
            ServerMessage::SessionCreated { .. }
            | ServerMessage::SessionUpdated { .. }
            | ServerMessage::Error { .. }
            | ServerMessage::Unknown => {}
        }
    }

    fn complete_response(&mut self, response: Option<ResponseInfo>) {
        let transcript = response
            .as_ref()
            .and_then(ResponseInfo::first_transcript)
            .map(str::to_owned);

        match transcript {
            Some(text) => {
                self.assistant_caption.process_completed(&text);
                self.log.append(Speaker::Assistant, text.clone());
                log::info!("Assistant turn completed ({} chars)", text.len());
                self.notify(Notification::OutputTextUpdated(text));
            }
            None => {
                log::debug!("response.done without transcript, no turn recorded");
            }
        }
    }

    /// User started talking over the assistant: drop its audio now
    fn barge_in(&mut self) {
        let dropped = self.reassembler.flush();
        self.stats.audio_fragments_dropped += dropped as u64;
        self.sink.stop();

        if let Some(id) = self.response_id.take() {
            self.cancelled_response = Some(id);
        }
        self.awaiting_new_response = true;
        self.speaking_turn = None;
        self.user_caption.reset();

        log::info!("Barge-in: playback cancelled ({} fragments dropped)", dropped);
        self.notify(Notification::UserStartedSpeaking);
    }

    fn begin_response(&mut self, response_id: Option<String>) {
        self.awaiting_new_response = false;
        self.reassembler.begin_turn();
        self.speaking_turn = None;
        self.assistant_caption.begin_response(response_id.as_deref());
        self.response_id = response_id;
    }

    fn accept_audio(&mut self, delta: &str, index: Option<u64>, response_id: Option<String>) {
        if self.awaiting_new_response {
            let from_cancelled = response_id.is_some() && response_id == self.cancelled_response;
            let starts_new = !from_cancelled && (response_id.is_some() || index == Some(0));
            if !starts_new {
                self.stats.audio_fragments_dropped += 1;
                log::debug!("Dropping audio from interrupted response {:?}", response_id);
                return;
            }
            self.begin_response(response_id);
        } else {
            let switched = matches!(
                (&response_id, &self.response_id),
                (Some(new), Some(current)) if new != current
            );
            if self.reassembler.current_turn().is_none() || switched {
                self.begin_response(response_id);
            } else if self.response_id.is_none() {
                self.response_id = response_id;
            }
        }

        let Some(turn) = self.reassembler.current_turn() else {
            return;
        };

        match self.reassembler.accept(turn, delta, index) {
            Ok(Acceptance::Queued) => {}
            Ok(outcome) => {
                self.stats.audio_fragments_dropped += 1;
                log::debug!("Audio fragment {:?} dropped: {:?}", index, outcome);
                return;
            }
            Err(e) => {
                self.stats.malformed_frames += 1;
                log::warn!("Discarding audio delta: {}", e);
                return;
            }
        }

        let ready = self.reassembler.drain_ready();
        if ready.is_empty() {
            return;
        }
        if self.speaking_turn != Some(turn) {
            self.speaking_turn = Some(turn);
            self.notify(Notification::AssistantSpeakingStarted);
        }
        for chunk in ready {
            self.sink.play(&chunk);
            self.stats.audio_chunks_played += 1;
        }
    }

    fn send_mic_frame(&mut self, attempt: Uuid, samples: &[i16]) {
        let gated = matches!(&self.state, State::Active { attempt: a, .. } if *a == attempt);
        if !gated {
            return;
        }
        self.send(&ClientMessage::audio_append(samples));
        self.stats.mic_frames_sent += 1;
    }

    fn send(&mut self, msg: &ClientMessage) {
        let json = match msg.to_json() {
            Ok(json) => json,
            Err(e) => {
                log::warn!("Failed to serialize client message: {}", e);
                return;
            }
        };
        if let Err(e) = self.transport.send_text(json) {
            log::warn!("{}", e);
        }
    }

    fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            log::debug!("Notification receiver dropped");
        }
    }

    /// Run the reducer and apply its effects
    fn dispatch(&mut self, event: Event) {
        let old = self.state.status();
        let (next, effects) = reduce(&self.state, event);

        if old != next.status() {
            log::info!("State transition: {} -> {}", old, next.status());
        }
        self.state = next;

        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport { attempt } => {
                log::info!("Opening transport (attempt {})", attempt);
                let events = TransportEvents::new(attempt, self.inputs.clone());
                self.transport.open(&self.request, events);
            }
            Effect::ResetConversation => {
                self.log.clear();
                self.reassembler.flush();
                self.assistant_caption.reset();
                self.user_caption.reset();
                self.response_id = None;
                self.cancelled_response = None;
                self.awaiting_new_response = false;
                self.speaking_turn = None;
                self.stats = SessionStats::default();
            }
            Effect::SendSessionConfig => {
                log::info!("Sending session configuration");
                self.send(&ClientMessage::session_update(self.session_config.clone()));
            }
            Effect::FlushPlayback => {
                let dropped = self.reassembler.flush();
                self.stats.audio_fragments_dropped += dropped as u64;
                self.sink.stop();
                self.response_id = None;
                self.speaking_turn = None;
            }
            Effect::CloseTransport => self.transport.close(),
            Effect::SettleConnect { outcome } => {
                if let Some(reply) = self.pending_connect.take() {
                    let _ = reply.send(outcome);
                }
            }
            Effect::EmitStatus => self.notify(Notification::StatusChanged(self.state.status())),
            Effect::EmitError { message } => {
                log::warn!("Session error: {}", message);
                self.notify(Notification::Error(message));
            }
            other => self.runner.spawn(other, self.inputs.clone()),
        }
    }
}
