//! WebSocket transport for the OpenAI Realtime API
//!
//! # Connection Flow
//!
//! 1. `open()` spawns one background task per connection
//! 2. The task dials with the bearer and beta headers, bounded by a connect timeout
//! 3. Once up it forwards inbound text frames and drains the outbound queue
//! 4. `close()` queues a close frame; the task reports `Closed` when the socket is down
//!
//! No retries here: reconnecting is always a fresh `connect()` by the caller.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};

use super::transport::{ConnectRequest, Transport, TransportEvent, TransportEvents};
use super::StreamingError;

/// Connection timeout for the WebSocket handshake itself
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// tokio-tungstenite implementation of [`Transport`]
pub struct WebSocketTransport {
    /// Outbound frames for the connection task
    outbound: Option<mpsc::UnboundedSender<Message>>,
    /// Connection task (aborted when superseded or dropped)
    task: Option<JoinHandle<()>>,
    connect_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::with_connect_timeout(CONNECTION_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            outbound: None,
            task: None,
            connect_timeout,
        }
    }
}

/// Build the upgrade request with auth headers
fn build_request(
    request: &ConnectRequest,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, StreamingError> {
    let mut ws_request = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| StreamingError::ConnectionFailed(e.to_string()))?;

    ws_request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&request.authorization())
            .map_err(|e| StreamingError::AuthenticationFailed(e.to_string()))?,
    );
    ws_request.headers_mut().insert(
        "OpenAI-Beta",
        HeaderValue::from_str(&request.beta_header)
            .map_err(|e| StreamingError::ConnectionFailed(e.to_string()))?,
    );

    Ok(ws_request)
}

async fn run_connection(
    request: ConnectRequest,
    events: TransportEvents,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    connect_timeout: Duration,
) {
    let ws_request = match build_request(&request) {
        Ok(r) => r,
        Err(e) => {
            events.emit(TransportEvent::Failed {
                reason: e.to_string(),
            });
            return;
        }
    };

    log::info!("Connecting to {}...", request.url);

    // disable_nagle: audio frames are latency sensitive
    let ws_stream = match timeout(
        connect_timeout,
        connect_async_with_config(ws_request, None, true),
    )
    .await
    {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            events.emit(TransportEvent::Failed {
                reason: StreamingError::ConnectionFailed(e.to_string()).to_string(),
            });
            return;
        }
        Err(_) => {
            events.emit(TransportEvent::Failed {
                reason: StreamingError::ConnectionFailed("Connection timeout".to_string())
                    .to_string(),
            });
            return;
        }
    };

    log::info!("WebSocket connected (attempt {})", events.attempt());
    if !events.emit(TransportEvent::Connected) {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Message::Close(frame)) => {
                    log::debug!("Sending close frame");
                    if let Err(e) = write.send(Message::Close(frame)).await {
                        log::warn!("Error sending close frame: {}", e);
                        events.emit(TransportEvent::Closed { reason: e.to_string() });
                        return;
                    }
                }
                Some(msg) => {
                    if let Err(e) = write.send(msg).await {
                        log::warn!("WebSocket send failed: {}", e);
                        events.emit(TransportEvent::Failed {
                            reason: StreamingError::SendFailed(e.to_string()).to_string(),
                        });
                        return;
                    }
                }
                None => {
                    // Owner dropped the sender without a close handshake
                    if let Err(e) = write.close().await {
                        log::debug!("Error closing WebSocket: {}", e);
                    }
                    events.emit(TransportEvent::Closed {
                        reason: "closed locally".to_string(),
                    });
                    return;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if !events.emit(TransportEvent::Text(text)) {
                        log::debug!("Engine gone, stopping connection task");
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    log::info!("WebSocket closed: {}", reason);
                    events.emit(TransportEvent::Closed { reason });
                    return;
                }
                Some(Ok(_)) => {} // Ignore ping/pong/binary
                Some(Err(e)) => {
                    log::warn!("WebSocket error: {}", e);
                    events.emit(TransportEvent::Failed {
                        reason: StreamingError::ProtocolError(e.to_string()).to_string(),
                    });
                    return;
                }
                None => {
                    events.emit(TransportEvent::Closed {
                        reason: "stream ended".to_string(),
                    });
                    return;
                }
            },
        }
    }
}

impl Transport for WebSocketTransport {
    fn open(&mut self, request: &ConnectRequest, events: TransportEvents) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        self.task = Some(tokio::spawn(run_connection(
            request.clone(),
            events,
            rx,
            self.connect_timeout,
        )));
    }

    fn send_text(&mut self, text: String) -> Result<(), StreamingError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| StreamingError::SendFailed("not connected".to_string()))?;
        outbound
            .send(Message::Text(text))
            .map_err(|_| StreamingError::SendFailed("connection task has exited".to_string()))
    }

    fn close(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            log::info!("Closing WebSocket...");
            // Task may already be gone; dropping the sender closes the socket then
            let _ = outbound.send(Message::Close(None));
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
