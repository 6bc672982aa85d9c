//! Transport boundary
//!
//! A duplex, message-oriented connection to the realtime endpoint. The engine
//! only ever talks to a `Transport`; the WebSocket implementation lives in
//! `websocket.rs` and tests substitute an in-memory one.

use tokio::sync::mpsc;
use uuid::Uuid;

use super::protocol::REALTIME_API_URL;
use super::StreamingError;
use crate::engine::Input;

/// Value of the `OpenAI-Beta` header for the realtime protocol
pub const REALTIME_BETA_HEADER: &str = "realtime=v1";

/// Everything needed to dial the realtime endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    /// Sent as `Authorization: Bearer <api_key>`
    pub api_key: String,
    /// Sent as `OpenAI-Beta: <beta_header>`
    pub beta_header: String,
}

impl ConnectRequest {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            url: REALTIME_API_URL.to_string(),
            api_key: api_key.into(),
            beta_header: REALTIME_BETA_HEADER.to_string(),
        }
    }

    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

// Keep the key out of logs
impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("beta_header", &self.beta_header)
            .finish()
    }
}

/// What a transport reports back to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    /// One inbound UTF-8 text frame
    Text(String),
    /// Remote or local close completed
    Closed { reason: String },
    /// Dial failure, I/O error or cancellation
    Failed { reason: String },
}

/// Event sink handed to `Transport::open`
///
/// Every event is tagged with the attempt that opened the transport, so
/// anything still in flight after a reconnect is recognised as stale.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    attempt: Uuid,
    tx: mpsc::UnboundedSender<Input>,
}

impl TransportEvents {
    pub fn new(attempt: Uuid, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> Uuid {
        self.attempt
    }

    /// Queue an event for the engine. Returns false once the engine is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Input::Transport {
                attempt: self.attempt,
                event,
            })
            .is_ok()
    }
}

/// A duplex text-frame connection
///
/// Implementations must never block the caller: `open` starts dialing in the
/// background and reports progress through `events`, `send_text` only queues.
pub trait Transport: Send {
    /// Start dialing. Any previous connection is abandoned.
    fn open(&mut self, request: &ConnectRequest, events: TransportEvents);

    /// Queue one outbound text frame
    fn send_text(&mut self, text: String) -> Result<(), StreamingError>;

    /// Begin a graceful close. A `Closed` event follows once the socket is
    /// down. Safe to call when nothing is open.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_headers() {
        let req = ConnectRequest::new("sk-test");
        assert_eq!(req.url, REALTIME_API_URL);
        assert_eq!(req.authorization(), "Bearer sk-test");
        assert_eq!(req.beta_header, "realtime=v1");
    }

    #[test]
    fn test_debug_redacts_key() {
        let req = ConnectRequest::new("sk-secret");
        let dbg = format!("{:?}", req);
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("redacted"));
    }

    #[test]
    fn test_events_are_tagged_with_attempt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let attempt = Uuid::new_v4();
        let events = TransportEvents::new(attempt, tx);

        assert!(events.emit(TransportEvent::Connected));
        match rx.try_recv().unwrap() {
            Input::Transport { attempt: a, event } => {
                assert_eq!(a, attempt);
                assert_eq!(event, TransportEvent::Connected);
            }
            other => panic!("unexpected input {:?}", other),
        }

        drop(rx);
        assert!(!events.emit(TransportEvent::Text("x".into())));
    }
}
