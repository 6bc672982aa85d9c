//! Realtime voice check-in sessions
//!
//! A check-in is one voice conversation with the OpenAI Realtime API:
//! microphone audio streams up, synthesized replies stream back, and every
//! completed utterance lands in a [`ConversationLog`] for later summarisation.
//!
//! [`start_session`] spawns the single-consumer session loop and returns a
//! [`SessionHandle`] for commands plus a channel of [`Notification`]s.

pub mod audio;
pub mod conversation;
pub mod effects;
pub mod engine;
pub mod settings;
pub mod state_machine;
pub mod streaming;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub use conversation::{ConversationLog, ConversationTurn, Speaker};
pub use engine::{Input, Notification, SessionEngine, SessionSnapshot, SessionStats};
pub use state_machine::ConnectionState;
pub use streaming::StreamingError;

use audio::AudioSink;
use effects::EffectRunner;
use streaming::{ConnectRequest, SessionConfig, Transport};

/// Collaborators for one session loop
pub struct SessionParts {
    pub request: ConnectRequest,
    pub session_config: SessionConfig,
    pub transport: Box<dyn Transport>,
    pub sink: Box<dyn AudioSink>,
    pub runner: Arc<dyn EffectRunner>,
}

/// Command side of a running session loop
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Input>,
}

impl SessionHandle {
    /// Open the session. Resolves once the transport is connected (the
    /// handshake then continues in the background) or with the failure.
    pub async fn connect(&self) -> Result<(), StreamingError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Input::Connect { reply: Some(reply) })
            .map_err(|_| StreamingError::EngineStopped)?;
        rx.await.map_err(|_| StreamingError::EngineStopped)?
    }

    /// End the session. Idempotent, never fails.
    pub fn disconnect(&self) {
        if self.tx.send(Input::Disconnect).is_err() {
            log::debug!("disconnect(): session loop already stopped");
        }
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, StreamingError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Input::Snapshot { reply })
            .map_err(|_| StreamingError::EngineStopped)?;
        rx.await.map_err(|_| StreamingError::EngineStopped)
    }

    /// Stop the loop; its task then resolves to the conversation log
    pub fn shutdown(&self) {
        let _ = self.tx.send(Input::Shutdown);
    }
}

/// Spawn the session loop on the current tokio runtime.
pub fn start_session(
    parts: SessionParts,
) -> (
    SessionHandle,
    mpsc::UnboundedReceiver<Notification>,
    JoinHandle<ConversationLog>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (engine, notifications) = SessionEngine::new(
        parts.request,
        parts.session_config,
        parts.transport,
        parts.sink,
        parts.runner,
        tx.clone(),
    );

    let task = tokio::spawn(run_session_loop(engine, rx));
    (SessionHandle { tx }, notifications, task)
}

/// Run the session loop until `Input::Shutdown`
async fn run_session_loop(
    mut engine: SessionEngine,
    mut rx: mpsc::UnboundedReceiver<Input>,
) -> ConversationLog {
    log::info!("Session loop started");

    while let Some(input) = rx.recv().await {
        log::trace!("Received input: {:?}", input);
        if !engine.handle(input) {
            break;
        }
    }

    log::info!("Session loop ended");
    engine.take_conversation()
}
