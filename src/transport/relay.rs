//! Relay-variant transport: media routed through a relay room.
//!
//! Instead of negotiating a peer connection, the client joins a named room
//! on the relay's signaling surface with a room-scoped token. The relay
//! acknowledges the join before any media or control traffic flows; readiness
//! is reported only after that acknowledgment. The same JSON event protocol
//! rides the signaling channel, so everything above this layer is
//! variant-agnostic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::protocol::ClientEvent;

use super::{
    EVENT_CHANNEL_CAPACITY, MicrophoneTrack, SignalHandler, Transport, TransportError, WsStream,
    spawn_channel_pump,
};

/// Relay room transport.
pub struct RelayTransport {
    room_name: String,
    token: String,
    server_url: String,

    connected: Arc<AtomicBool>,
    microphone: Arc<MicrophoneTrack>,
    handler: Option<SignalHandler>,
    sender: Arc<Mutex<Option<mpsc::Sender<ClientEvent>>>>,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RelayTransport {
    /// Create a transport for a provisioned room and its scoped token.
    pub fn new(room_name: String, token: String, server_url: String) -> Self {
        Self {
            room_name,
            token,
            server_url,
            connected: Arc::new(AtomicBool::new(false)),
            microphone: Arc::new(MicrophoneTrack::new()),
            handler: None,
            sender: Arc::new(Mutex::new(None)),
            pump_handle: Mutex::new(None),
        }
    }

    /// Signaling URL with the room token in the query, as the relay expects.
    fn signaling_url(&self) -> Result<url::Url, TransportError> {
        let base = format!("{}/rtc", self.server_url.trim_end_matches('/'));
        let mut parsed = url::Url::parse(&base)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{base}: {e}")))?;
        parsed
            .query_pairs_mut()
            .append_pair("access_token", &self.token)
            .append_pair("room", &self.room_name);
        Ok(parsed)
    }

    /// Read signaling frames until the relay acknowledges the join.
    async fn await_join_ack(&self, stream: &mut WsStream) -> Result<(), TransportError> {
        while let Some(frame) = stream.next().await {
            let message =
                frame.map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
            let Message::Text(text) = message else {
                continue;
            };
            let payload: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| TransportError::HandshakeFailed(format!("bad join frame: {e}")))?;
            match payload.get("type").and_then(|t| t.as_str()) {
                Some("room.joined") => {
                    debug!(room = %self.room_name, "relay acknowledged room join");
                    return Ok(());
                }
                Some("error") => {
                    let detail = payload
                        .get("detail")
                        .and_then(|d| d.as_str())
                        .unwrap_or("relay rejected join");
                    if detail.contains("token") || detail.contains("unauthorized") {
                        return Err(TransportError::AuthenticationFailed(detail.to_string()));
                    }
                    return Err(TransportError::HandshakeFailed(detail.to_string()));
                }
                other => {
                    debug!(kind = ?other, "ignoring pre-join signaling frame");
                }
            }
        }
        Err(TransportError::HandshakeFailed(
            "relay closed before acknowledging join".to_string(),
        ))
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let url = self.signaling_url()?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ChannelError(e.to_string()))?;
        let (mut sink, mut stream) = ws_stream.split();

        let join = json!({ "type": "join", "room": self.room_name });
        sink.send(Message::Text(join.to_string().into()))
            .await
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        self.await_join_ack(&mut stream).await?;

        // Announce the local audio track once we are in the room.
        let publish = json!({ "type": "track.publish", "kind": "audio" });
        sink.send(Message::Text(publish.to_string().into()))
            .await
            .map_err(|e| TransportError::ChannelError(e.to_string()))?;
        info!(room = %self.room_name, "relay transport connected");

        let (tx, rx) = mpsc::channel::<ClientEvent>(EVENT_CHANNEL_CAPACITY);
        *self.sender.lock().await = Some(tx);

        let handle = spawn_channel_pump(
            sink,
            stream,
            rx,
            self.handler.clone(),
            self.connected.clone(),
        );
        *self.pump_handle.lock().await = Some(handle);

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_event(&self, event: ClientEvent) {
        if !self.connected.load(Ordering::SeqCst) {
            debug!(?event, "dropping control event, not in room");
            return;
        }
        let guard = self.sender.lock().await;
        match guard.as_ref() {
            Some(tx) => {
                if let Err(e) = tx.send(event).await {
                    warn!("dropping control event, pump gone: {e}");
                }
            }
            None => debug!("dropping control event, not in room"),
        }
    }

    fn set_microphone(&self, enabled: bool) {
        self.microphone.set_enabled(enabled);
        debug!(enabled, "microphone track toggled");
    }

    fn on_signal(&mut self, handler: SignalHandler) {
        if self.handler.is_some() {
            debug!("replacing control-channel consumer");
        }
        self.handler = Some(handler);
    }

    async fn disconnect(&mut self) {
        self.microphone.stop();
        *self.sender.lock().await = None;
        if let Some(handle) = self.pump_handle.lock().await.take() {
            handle.abort();
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(room = %self.room_name, "relay transport disconnected");
        }
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
