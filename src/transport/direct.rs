//! Direct-variant transport: peer connection to the hosted realtime endpoint.
//!
//! Connection establishment has two legs, both authenticated with the
//! session's ephemeral credential:
//!
//! 1. The local SDP offer is posted over HTTPS to the realtime endpoint with
//!    `Authorization: Bearer <token>` and the model identifier; the SDP
//!    answer comes back in the response body.
//! 2. The bidirectional JSON event channel is opened to the same endpoint's
//!    WebSocket surface and carries all control messages.
//!
//! Readiness is reported only after both legs complete. Media flows on the
//! negotiated peer connection; this layer owns the event channel and the
//! local microphone track handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tracing::{debug, info, warn};

use crate::protocol::ClientEvent;

use super::{
    EVENT_CHANNEL_CAPACITY, MicrophoneTrack, SignalHandler, Transport, TransportError,
    spawn_channel_pump,
};

/// Direct peer-connection transport.
pub struct DirectTransport {
    token: String,
    model: String,
    sdp_endpoint: String,
    ws_url: String,
    http: reqwest::Client,

    connected: Arc<AtomicBool>,
    microphone: Arc<MicrophoneTrack>,
    handler: Option<SignalHandler>,
    sender: Arc<Mutex<Option<mpsc::Sender<ClientEvent>>>>,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DirectTransport {
    /// Create a transport from an ephemeral credential and endpoint pair.
    pub fn new(token: String, model: String, sdp_endpoint: String, ws_url: String) -> Self {
        Self {
            token,
            model,
            sdp_endpoint,
            ws_url,
            http: reqwest::Client::new(),
            connected: Arc::new(AtomicBool::new(false)),
            microphone: Arc::new(MicrophoneTrack::new()),
            handler: None,
            sender: Arc::new(Mutex::new(None)),
            pump_handle: Mutex::new(None),
        }
    }

    /// Minimal audio-only SDP offer for the negotiation leg.
    ///
    /// The remote endpoint anchors the media plane; this layer only needs an
    /// offer the endpoint can answer.
    fn local_offer() -> String {
        let session_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        format!(
            "v=0\r\n\
             o=- {session_id} 2 IN IP4 127.0.0.1\r\n\
             s=-\r\nt=0 0\r\n\
             a=group:BUNDLE 0\r\n\
             m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=mid:0\r\n\
             a=rtcp-mux\r\n\
             a=sendrecv\r\n\
             a=rtpmap:111 opus/48000/2\r\n"
        )
    }

    /// Post the offer, return the remote answer.
    async fn negotiate(&self) -> Result<String, TransportError> {
        let url = format!("{}?model={}", self.sdp_endpoint, self.model);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(Self::local_offer())
            .send()
            .await
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(TransportError::AuthenticationFailed(format!(
                "realtime endpoint rejected ephemeral credential ({})",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(TransportError::HandshakeFailed(format!(
                "offer rejected with status {}",
                response.status()
            )));
        }

        let answer = response
            .text()
            .await
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        if !answer.starts_with("v=") {
            return Err(TransportError::HandshakeFailed(
                "response body is not an SDP answer".to_string(),
            ));
        }
        Ok(answer)
    }

    /// Build the WebSocket upgrade request for the event channel.
    fn channel_request(&self) -> Result<http::Request<()>, TransportError> {
        let url = format!("{}?model={}", self.ws_url, self.model);
        let parsed = url::Url::parse(&url)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::InvalidEndpoint(format!("{url}: missing host")))?
            .to_string();

        http::Request::builder()
            .uri(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| TransportError::ChannelError(e.to_string()))
    }
}

#[async_trait]
impl Transport for DirectTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let answer = self.negotiate().await?;
        debug!(answer_len = answer.len(), "SDP answer accepted");

        let request = self.channel_request()?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::ChannelError(e.to_string()))?;
        info!(model = %self.model, "direct transport connected");

        let (sink, stream) = ws_stream.split();
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
            debug!(?event, "dropping control event, channel not open");
            return;
        }
        let guard = self.sender.lock().await;
        match guard.as_ref() {
            Some(tx) => {
                if let Err(e) = tx.send(event).await {
                    warn!("dropping control event, pump gone: {e}");
                }
            }
            None => debug!("dropping control event, channel not open"),
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
        // Teardown order: local media, control channel, connection.
        self.microphone.stop();
        *self.sender.lock().await = None;
        if let Some(handle) = self.pump_handle.lock().await.take() {
            handle.abort();
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("direct transport disconnected");
        }
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
