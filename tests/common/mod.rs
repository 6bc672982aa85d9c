//! Shared fakes for driving the session engine without a network or audio device.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use checkin_lib::audio::{AudioError, AudioSink};
use checkin_lib::effects::EffectRunner;
use checkin_lib::state_machine::Effect;
use checkin_lib::streaming::{
    ConnectRequest, SessionConfig, StreamingError, Transport, TransportEvent, TransportEvents,
};
use checkin_lib::{ConnectionState, Input, Notification, SessionEngine};

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
pub struct TransportLog {
    pub opens: Vec<ConnectRequest>,
    pub events: Option<TransportEvents>,
    pub sent: Vec<String>,
    pub closes: usize,
}

/// In-memory transport. Clones share the same log, so a test keeps one
/// clone as a probe after handing the other to the engine.
#[derive(Clone, Default)]
pub struct MockTransport {
    log: Arc<Mutex<TransportLog>>,
    /// Confirm `close()` with a `Closed` event, like a well-behaved server
    auto_close: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_closing() -> Self {
        Self {
            auto_close: true,
            ..Self::default()
        }
    }

    pub fn attempt(&self) -> Option<Uuid> {
        self.log.lock().unwrap().events.as_ref().map(|e| e.attempt())
    }

    /// Push an event as the transport for the latest attempt
    pub fn emit(&self, event: TransportEvent) -> bool {
        let events = self.log.lock().unwrap().events.clone();
        events.map(|e| e.emit(event)).unwrap_or(false)
    }

    pub fn opens(&self) -> Vec<ConnectRequest> {
        self.log.lock().unwrap().opens.clone()
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }

    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.log
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub fn sent_of_type(&self, kind: &str) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter(|v| v["type"] == kind)
            .collect()
    }
}

impl Transport for MockTransport {
    fn open(&mut self, request: &ConnectRequest, events: TransportEvents) {
        let mut log = self.log.lock().unwrap();
        log.opens.push(request.clone());
        log.events = Some(events);
    }

    fn send_text(&mut self, text: String) -> Result<(), StreamingError> {
        self.log.lock().unwrap().sent.push(text);
        Ok(())
    }

    fn close(&mut self) {
        let events = {
            let mut log = self.log.lock().unwrap();
            log.closes += 1;
            log.events.clone()
        };
        if self.auto_close {
            if let Some(events) = events {
                events.emit(TransportEvent::Closed {
                    reason: "closed locally".to_string(),
                });
            }
        }
    }
}

// ============================================================================
// Effect runner
// ============================================================================

/// Records runner effects instead of spawning anything
#[derive(Clone, Default)]
pub struct RecordingRunner {
    effects: Arc<Mutex<Vec<Effect>>>,
}

impl RecordingRunner {
    pub fn effects(&self) -> Vec<Effect> {
        self.effects.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Effect) -> bool) -> usize {
        self.effects().iter().filter(|e| pred(e)).count()
    }
}

impl EffectRunner for RecordingRunner {
    fn spawn(&self, effect: Effect, _tx: mpsc::UnboundedSender<Input>) {
        self.effects.lock().unwrap().push(effect);
    }
}

// ============================================================================
// Audio sink
// ============================================================================

#[derive(Default)]
pub struct SinkLog {
    pub bytes: Vec<u8>,
    pub stops: usize,
    pub finished: bool,
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
}

impl RecordingSink {
    pub fn bytes(&self) -> Vec<u8> {
        self.log.lock().unwrap().bytes.clone()
    }

    pub fn stops(&self) -> usize {
        self.log.lock().unwrap().stops
    }

    pub fn finished(&self) -> bool {
        self.log.lock().unwrap().finished
    }
}

impl AudioSink for RecordingSink {
    fn play(&mut self, pcm: &[u8]) {
        self.log.lock().unwrap().bytes.extend_from_slice(pcm);
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().stops += 1;
    }

    fn finish(&mut self) -> Result<(), AudioError> {
        self.log.lock().unwrap().finished = true;
        Ok(())
    }
}

// ============================================================================
// Synchronous harness around SessionEngine
// ============================================================================

pub struct Harness {
    pub engine: SessionEngine,
    pub notifications: mpsc::UnboundedReceiver<Notification>,
    pub inputs: mpsc::UnboundedReceiver<Input>,
    pub transport: MockTransport,
    pub runner: RecordingRunner,
    pub sink: RecordingSink,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_transport(MockTransport::new())
    }

    pub fn with_transport(transport: MockTransport) -> Self {
        let runner = RecordingRunner::default();
        let sink = RecordingSink::default();
        let (tx, inputs) = mpsc::unbounded_channel();
        let config = SessionConfig {
            instructions: "Ask how the habit went today.".to_string(),
            ..SessionConfig::default()
        };
        let (engine, notifications) = SessionEngine::new(
            ConnectRequest::new("sk-test"),
            config,
            Box::new(transport.clone()),
            Box::new(sink.clone()),
            Arc::new(runner.clone()),
            tx,
        );

        Self {
            engine,
            notifications,
            inputs,
            transport,
            runner,
            sink,
        }
    }

    pub fn status(&self) -> ConnectionState {
        self.engine.status()
    }

    pub fn attempt(&self) -> Uuid {
        self.transport.attempt().expect("transport was never opened")
    }

    pub fn connect(&mut self) {
        self.engine.handle(Input::Connect { reply: None });
    }

    pub fn transport_event(&mut self, event: TransportEvent) {
        let attempt = self.attempt();
        self.engine.handle(Input::Transport { attempt, event });
    }

    pub fn frame(&mut self, json: &str) {
        self.transport_event(TransportEvent::Text(json.to_string()));
    }

    /// Process anything the fakes queued for the engine
    pub fn pump(&mut self) {
        while let Ok(input) = self.inputs.try_recv() {
            self.engine.handle(input);
        }
    }

    /// Walk the handshake up to Active and forget the notifications it produced
    pub fn activate(&mut self) {
        self.connect();
        self.transport_event(TransportEvent::Connected);
        self.frame(r#"{"type":"session.created","session":{"id":"sess_test"}}"#);
        self.frame(r#"{"type":"session.updated"}"#);
        assert_eq!(self.status(), ConnectionState::Active);
        self.drain_notifications();
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }
}

pub fn status_changes(notifications: &[Notification]) -> Vec<ConnectionState> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::StatusChanged(s) => Some(*s),
            _ => None,
        })
        .collect()
}

pub fn audio_delta(delta: &str, index: u64) -> String {
    format!(
        r#"{{"type":"response.audio.delta","response_id":"resp_1","delta":"{}","index":{}}}"#,
        delta, index
    )
}
