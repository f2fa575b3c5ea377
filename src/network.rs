use anyhow::{ Context, Result };
use futures_util::{ SinkExt, StreamExt };
use parking_lot::{ Mutex, RwLock };
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{ mpsc, watch };
use tokio::time::{ self, Instant };
use tokio_tungstenite::{ connect_async, tungstenite::Message };

use crate::config::NetworkConfig;
use crate::error::StreamError;
use crate::events::TrackEvent;
use crate::normalize::normalize;
use crate::state::TrackerContext;
use crate::types::ConnectionState;

/// Client -> server keep-alive payload
pub const HEARTBEAT: &str = r#"{"type":"heartbeat"}"#;

/// What the stream client reports upward
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    State(ConnectionState),
    Message(Value),
}

/// Decoded inbound text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Server heartbeat echo, consumed by the client
    Heartbeat,
    Record(Value),
}

/// Classify one text frame; malformed JSON is an error
pub fn classify(text: &str) -> Result<Inbound, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    if value.get("type").and_then(Value::as_str) == Some("heartbeat") {
        Ok(Inbound::Heartbeat)
    } else {
        Ok(Inbound::Record(value))
    }
}

enum Command {
    Send(String),
    Close,
}

struct Shared {
    state: RwLock<ConnectionState>,

    /// Command queue of the live connection, if any
    outbound: Mutex<Option<mpsc::UnboundedSender<Command>>>,

    shutdown: watch::Sender<bool>,
}

/// Persistent telemetry stream connection with heartbeat and reconnect
///
/// Reconnects after a fixed delay, forever, until `shutdown` is called.
#[derive(Clone)]
pub struct StreamClient {
    ctx: Arc<TrackerContext>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamClient {
    pub fn new(ctx: Arc<TrackerContext>, events: mpsc::UnboundedSender<StreamEvent>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::Disconnected),
                outbound: Mutex::new(None),
                shutdown,
            }),
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Transmit a message, only while connected
    pub fn send(&self, message: &Value) -> Result<(), StreamError> {
        if self.is_shut_down() {
            return Err(StreamError::Closed);
        }
        if self.state() != ConnectionState::Connected {
            return Err(StreamError::NotConnected);
        }

        self.shared.outbound
            .lock()
            .as_ref()
            .ok_or(StreamError::NotConnected)?
            .send(Command::Send(message.to_string()))
            .map_err(|_| StreamError::NotConnected)
    }

    /// Tear down the current connection; the reconnect timer still applies
    pub fn close(&self) {
        if let Some(tx) = self.shared.outbound.lock().as_ref() {
            let _ = tx.send(Command::Close);
        }
    }

    /// Stop the client for good
    pub fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
    }

    fn is_shut_down(&self) -> bool {
        *self.shared.shutdown.borrow()
    }

    /// Main run loop - manages the WebSocket connection with auto-reconnect
    pub async fn run(self) {
        let mut shutdown = self.shared.shutdown.subscribe();

        while !self.is_shut_down() {
            let config = self.ctx.config().network;

            self.set_state(ConnectionState::Connecting);
            tracing::info!("Attempting to connect to WebSocket: {}", config.websocket_url);

            match self.connect_websocket(&config).await {
                Ok(_) => {
                    tracing::info!("WebSocket connection closed");
                }
                Err(e) => {
                    tracing::error!("WebSocket error: {:#}", e);
                }
            }

            self.set_state(ConnectionState::Disconnected);

            if self.is_shut_down() {
                break;
            }

            // Fixed delay, no backoff
            let delay = config.reconnect_delay();
            tracing::info!("Reconnecting in {} ms...", delay.as_millis());
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Stream client stopped");
    }

    /// Connect to WebSocket and pump frames until the connection ends
    async fn connect_websocket(&self, config: &NetworkConfig) -> Result<()> {
        let (ws_stream, _) = connect_async(config.websocket_url.as_str()).await.context(
            "Failed to connect to WebSocket"
        )?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.shared.outbound.lock() = Some(tx);
        self.set_state(ConnectionState::Connected);

        let (mut write, mut read) = ws_stream.split();

        let period = config.heartbeat_interval();
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        let mut shutdown = self.shared.shutdown.subscribe();
        if *shutdown.borrow() {
            *self.shared.outbound.lock() = None;
            return Ok(());
        }

        let result = loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_message(&text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => self.handle_message(&text),
                        Err(_) => tracing::warn!("Dropping non UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed by server");
                        break Ok(());
                    }
                    Some(Ok(_)) => {
                        // ping/pong handled by tungstenite
                    }
                    Some(Err(e)) => break Err(e).context("WebSocket read failed"),
                    None => break Ok(()),
                },

                _ = heartbeat.tick() => {
                    if let Err(e) = write.send(Message::Text(HEARTBEAT.to_string())).await {
                        break Err(e).context("Failed to send heartbeat");
                    }
                    tracing::trace!("Heartbeat sent");
                }

                cmd = rx.recv() => match cmd {
                    Some(Command::Send(text)) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            break Err(e).context("Failed to send message");
                        }
                    }
                    Some(Command::Close) | None => {
                        tracing::info!("Closing WebSocket connection");
                        let _ = write.send(Message::Close(None)).await;
                        break Ok(());
                    }
                },

                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    break Ok(());
                }
            }
        };

        *self.shared.outbound.lock() = None;
        result
    }

    /// Forward a text frame unless it is a heartbeat or malformed
    fn handle_message(&self, text: &str) {
        match classify(text) {
            Ok(Inbound::Heartbeat) => tracing::debug!("Heartbeat received"),
            Ok(Inbound::Record(value)) => {
                let _ = self.events.send(StreamEvent::Message(value));
            }
            Err(e) => tracing::warn!("Dropping malformed frame: {}", e),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.shared.state.write();
            let changed = *state != next;
            *state = next;
            changed
        };

        if changed {
            tracing::debug!("Connection state -> {:?}", next);
            let _ = self.events.send(StreamEvent::State(next));
        }
    }
}

/// Apply stream events to the fleet in arrival order
pub async fn forward_to_fleet(ctx: Arc<TrackerContext>, mut rx: mpsc::UnboundedReceiver<StreamEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::State(state) => ctx.events().emit(TrackEvent::Connection(state)),
            StreamEvent::Message(raw) =>
                match normalize(&raw) {
                    Ok(agent) => ctx.fleet().ingest(agent),
                    Err(e) => tracing::warn!("Dropping telemetry record: {}", e),
                }
        }
    }
}
