//! Connection state machine for a realtime check-in session
//!
//! This module implements the session lifecycle using a single-writer pattern.
//! All state transitions go through the `reduce()` function, which returns
//! a new state and a list of effects to execute.
//!
//! ```text
//! Idle ─connect─▶ Connecting ─transport up─▶ AwaitingSessionCreated
//!   ▲                                              │ session.created
//!   │                                              ▼
//!   │                                      ConfiguringSession
//!   │                                              │ session.updated
//!   │                                              ▼
//!   └──transport closed──── Closing ◀─disconnect── Active
//! ```
//!
//! Transport loss or a stage timeout returns any non-Idle state to Idle.

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::streaming::StreamingError;

/// Public view of the session lifecycle, without per-attempt data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    AwaitingSessionCreated,
    ConfiguringSession,
    Active,
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingSessionCreated => "awaiting_session_created",
            ConnectionState::ConfiguringSession => "configuring_session",
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
        }
    }

    /// True for the stages between `connect()` and `Active`.
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::AwaitingSessionCreated
                | ConnectionState::ConfiguringSession
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal state of one session lifecycle.
/// This is the authoritative state - all transitions go through the reducer.
#[derive(Debug, Clone, Default)]
pub enum State {
    #[default]
    Idle,
    Connecting {
        attempt: Uuid,
    },
    AwaitingSessionCreated {
        attempt: Uuid,
    },
    ConfiguringSession {
        attempt: Uuid,
        session_id: Option<String>,
    },
    Active {
        attempt: Uuid,
        session_id: Option<String>,
        since: Instant,
    },
    Closing {
        attempt: Uuid,
    },
}

impl State {
    pub fn status(&self) -> ConnectionState {
        match self {
            State::Idle => ConnectionState::Idle,
            State::Connecting { .. } => ConnectionState::Connecting,
            State::AwaitingSessionCreated { .. } => ConnectionState::AwaitingSessionCreated,
            State::ConfiguringSession { .. } => ConnectionState::ConfiguringSession,
            State::Active { .. } => ConnectionState::Active,
            State::Closing { .. } => ConnectionState::Closing,
        }
    }

    /// Connection attempt this state belongs to (`None` when Idle)
    pub fn attempt(&self) -> Option<Uuid> {
        match self {
            State::Idle => None,
            State::Connecting { attempt }
            | State::AwaitingSessionCreated { attempt }
            | State::ConfiguringSession { attempt, .. }
            | State::Active { attempt, .. }
            | State::Closing { attempt } => Some(*attempt),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            State::ConfiguringSession { session_id, .. } | State::Active { session_id, .. } => {
                session_id.as_deref()
            }
            _ => None,
        }
    }
}

/// Events that can trigger state transitions.
/// Sources: caller commands, the transport task, decoded server frames and timers.
#[derive(Debug, Clone)]
pub enum Event {
    /// Caller asked to open a session
    Connect,
    /// Caller asked to end the session
    Disconnect,

    // Transport events (tagged with the attempt that opened the transport)
    TransportConnected {
        attempt: Uuid,
    },
    TransportFailed {
        attempt: Uuid,
        reason: String,
    },
    TransportClosed {
        attempt: Uuid,
        reason: String,
    },

    // Lifecycle frames from the server
    SessionCreated {
        session_id: Option<String>,
    },
    SessionUpdated,

    /// A stage deadline fired (includes attempt and stage to prevent stale timeouts)
    StageTimeout {
        attempt: Uuid,
        stage: ConnectionState,
    },
}

/// Effects to be executed after a state transition.
/// The engine applies most of them inline; timers and capture go to the effect runner.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Dial the realtime endpoint for this attempt
    OpenTransport {
        attempt: Uuid,
    },
    /// Start of a new session: clear the conversation log and buffers
    ResetConversation,
    /// Serialize and send the session configuration (once per session)
    SendSessionConfig,
    /// Ask the capture collaborator to start streaming microphone audio
    StartCapture {
        attempt: Uuid,
    },
    StopCapture,
    /// Drop all queued and in-flight assistant audio
    FlushPlayback,
    CloseTransport,
    /// Arm the deadline for the stage just entered
    ArmTimeout {
        attempt: Uuid,
        stage: ConnectionState,
    },
    /// Resolve a caller suspended in `connect()`
    SettleConnect {
        outcome: Result<(), StreamingError>,
    },
    /// Signal to emit a status-changed notification
    EmitStatus,
    EmitError {
        message: String,
    },
}

/// Effects shared by every abnormal return to Idle from a connected state.
fn teardown(reason: Option<String>) -> Vec<Effect> {
    use Effect::*;
    let mut effects = vec![FlushPlayback, StopCapture, CloseTransport];
    if let Some(message) = reason {
        effects.push(EmitError { message });
    }
    effects.push(EmitStatus);
    effects
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore transport events and timeouts with stale attempt ids
/// - Always emit EmitStatus after a status change
pub fn reduce(state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    let current = state.attempt();
    let is_current = |eid: Uuid| current == Some(eid);

    match (state, event) {
        // -----------------
        // Idle
        // -----------------
        (Idle, Connect) => {
            let attempt = Uuid::new_v4();
            (
                Connecting { attempt },
                vec![
                    ResetConversation,
                    OpenTransport { attempt },
                    ArmTimeout {
                        attempt,
                        stage: ConnectionState::Connecting,
                    },
                    EmitStatus,
                ],
            )
        }
        // Busy: the engine rejects this before reducing, keep the reducer total anyway
        (_, Connect) => (state.clone(), vec![]),
        (Idle, Disconnect) => (Idle, vec![]),

        // -----------------
        // Connecting
        // -----------------
        (Connecting { attempt }, TransportConnected { attempt: eid }) if *attempt == eid => (
            AwaitingSessionCreated { attempt: *attempt },
            vec![
                SettleConnect { outcome: Ok(()) },
                ArmTimeout {
                    attempt: *attempt,
                    stage: ConnectionState::AwaitingSessionCreated,
                },
                EmitStatus,
            ],
        ),
        (Connecting { attempt }, TransportFailed { attempt: eid, reason }) if *attempt == eid => (
            Idle,
            vec![
                SettleConnect {
                    outcome: Err(StreamingError::ConnectionFailed(reason.clone())),
                },
                CloseTransport,
                EmitError { message: reason },
                EmitStatus,
            ],
        ),
        (Connecting { attempt }, TransportClosed { attempt: eid, reason }) if *attempt == eid => (
            Idle,
            vec![
                SettleConnect {
                    outcome: Err(StreamingError::Disconnected(reason.clone())),
                },
                EmitError { message: reason },
                EmitStatus,
            ],
        ),
        // Cancel while dialing: nothing to drain, drop the dial and go home
        (Connecting { .. }, Disconnect) => (
            Idle,
            vec![
                SettleConnect {
                    outcome: Err(StreamingError::Disconnected(
                        "connect cancelled".to_string(),
                    )),
                },
                CloseTransport,
                EmitStatus,
            ],
        ),

        // -----------------
        // AwaitingSessionCreated
        // -----------------
        (AwaitingSessionCreated { attempt }, SessionCreated { session_id }) => (
            ConfiguringSession {
                attempt: *attempt,
                session_id,
            },
            vec![
                SendSessionConfig,
                ArmTimeout {
                    attempt: *attempt,
                    stage: ConnectionState::ConfiguringSession,
                },
                EmitStatus,
            ],
        ),

        // -----------------
        // ConfiguringSession
        // -----------------
        (
            ConfiguringSession {
                attempt,
                session_id,
            },
            SessionUpdated,
        ) => (
            Active {
                attempt: *attempt,
                session_id: session_id.clone(),
                since: Instant::now(),
            },
            vec![StartCapture { attempt: *attempt }, EmitStatus],
        ),

        // -----------------
        // Graceful close from any connected stage
        // -----------------
        (
            AwaitingSessionCreated { attempt }
            | ConfiguringSession { attempt, .. }
            | Active { attempt, .. },
            Disconnect,
        ) => (
            Closing { attempt: *attempt },
            vec![
                FlushPlayback,
                StopCapture,
                CloseTransport,
                ArmTimeout {
                    attempt: *attempt,
                    stage: ConnectionState::Closing,
                },
                EmitStatus,
            ],
        ),
        (Closing { .. }, Disconnect) => (state.clone(), vec![]),

        // -----------------
        // Closing
        // -----------------
        (Closing { attempt }, TransportClosed { attempt: eid, .. })
        | (Closing { attempt }, TransportFailed { attempt: eid, .. })
            if *attempt == eid =>
        {
            (Idle, vec![EmitStatus])
        }

        // -----------------
        // Abnormal transport loss (engine never assumes graceful shutdown)
        // -----------------
        (_, TransportClosed { attempt, reason }) | (_, TransportFailed { attempt, reason })
            if is_current(attempt) =>
        {
            (Idle, teardown(Some(reason)))
        }

        // -----------------
        // Stage deadlines
        // -----------------
        (_, StageTimeout { attempt, stage }) if is_current(attempt) && state.status() == stage => {
            let message = format!("{} timed out", stage);
            match stage {
                ConnectionState::Connecting => (
                    Idle,
                    vec![
                        SettleConnect {
                            outcome: Err(StreamingError::Timeout(stage)),
                        },
                        CloseTransport,
                        EmitError { message },
                        EmitStatus,
                    ],
                ),
                handshake if handshake.is_handshake() => (Idle, teardown(Some(message))),
                ConnectionState::Closing => (Idle, vec![CloseTransport, EmitStatus]),
                // Idle and Active have no deadline
                _ => (state.clone(), vec![]),
            }
        }

        // -----------------
        // Stale or out-of-place events (drop silently)
        // -----------------
        _ => (state.clone(), vec![]),
    }
}
