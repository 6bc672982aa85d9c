//! Realtime session plumbing
//!
//! WebSocket transport, wire protocol and the two stream reconstructors that
//! turn server deltas into playable audio and readable captions.
//!
//! # Architecture
//!
//! ```text
//! WebSocket frames ──▶ Transport ──▶ SessionEngine (decode + dispatch)
//!                                        │
//!                        ┌───────────────┼──────────────────┐
//!                        ▼               ▼                  ▼
//!                 AudioReassembler  TranscriptAggregator  ConversationLog
//!                 (ordered PCM)     (live captions)       (completed turns)
//! ```
//!
//! # Fault Strategy
//!
//! - Malformed frames are logged and discarded, never fatal
//! - Transport loss returns the session to Idle (no automatic reconnection)
//! - Every handshake stage is bounded by a timeout

mod audio_reassembler;
pub mod protocol;
mod transcript_aggregator;
pub mod transport;
mod websocket;

use std::time::Duration;

use crate::state_machine::ConnectionState;

pub use audio_reassembler::{Acceptance, AudioReassembler};
pub use protocol::{ClientMessage, ServerMessage, SessionConfig};
pub use transcript_aggregator::TranscriptAggregator;
pub use transport::{ConnectRequest, Transport, TransportEvent, TransportEvents};
pub use websocket::WebSocketTransport;

/// Errors that can occur during a realtime session
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamingError {
    /// OpenAI API key not configured
    #[error("OpenAI API key not configured. Set OPENAI_API_KEY environment variable.")]
    MissingApiKey,
    /// `connect()` called while a session is already in progress
    #[error("Session busy ({0}), disconnect first")]
    Busy(ConnectionState),
    /// Failed to establish WebSocket connection
    #[error("Failed to connect to OpenAI Realtime API: {0}")]
    ConnectionFailed(String),
    /// Authentication with OpenAI failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    /// WebSocket protocol error
    #[error("WebSocket protocol error: {0}")]
    ProtocolError(String),
    /// Connection was closed unexpectedly
    #[error("WebSocket disconnected: {0}")]
    Disconnected(String),
    /// Failed to send a frame
    #[error("Failed to send frame: {0}")]
    SendFailed(String),
    /// A handshake stage exceeded its deadline
    #[error("{0} timed out")]
    Timeout(ConnectionState),
    /// Audio delta payload was not valid base64
    #[error("Invalid audio delta: {0}")]
    InvalidAudio(String),
    /// The session loop is no longer running
    #[error("Session loop has stopped")]
    EngineStopped,
}

/// Deadlines for the stages that wait on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub connecting: Duration,
    pub awaiting_session_created: Duration,
    pub configuring_session: Duration,
    pub closing: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            connecting: Duration::from_secs(10),
            awaiting_session_created: Duration::from_secs(5),
            configuring_session: Duration::from_secs(5),
            closing: Duration::from_secs(3),
        }
    }
}

impl StageTimeouts {
    /// Deadline for `stage`, or `None` for stages that wait indefinitely
    pub fn for_stage(&self, stage: ConnectionState) -> Option<Duration> {
        match stage {
            ConnectionState::Connecting => Some(self.connecting),
            ConnectionState::AwaitingSessionCreated => Some(self.awaiting_session_created),
            ConnectionState::ConfiguringSession => Some(self.configuring_session),
            ConnectionState::Closing => Some(self.closing),
            ConnectionState::Idle | ConnectionState::Active => None,
        }
    }
}
