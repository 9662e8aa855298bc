//! Transport adapters for the two voice backends.
//!
//! A session talks to its voice backend through the [`Transport`] trait:
//! either a direct peer connection to the hosted realtime endpoint
//! ([`direct::DirectTransport`]) or a managed room relay
//! ([`relay::RelayTransport`]). The two variants differ in connection
//! establishment; once connected they share the same surface: a JSON control
//! channel feeding one registered consumer, a local microphone track, and
//! idempotent scoped teardown.
//!
//! Transport failures never cross the callback boundary as panics or thrown
//! errors. Mid-session faults arrive at the consumer as
//! [`TransportSignal::Fault`] so the owning state machine can transition and
//! the UI keeps a retry path.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::collaborators::TransportCredentials;
use crate::config::SessionSettings;
use crate::protocol::ClientEvent;

pub mod direct;
pub mod relay;

pub use direct::DirectTransport;
pub use relay::RelayTransport;

/// Channel capacity for outbound control events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Errors raised while establishing a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The backend rejected the session credential
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The connection handshake (offer/answer or room join) failed
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The control channel could not be opened
    #[error("control channel error: {0}")]
    ChannelError(String),

    /// An endpoint URL could not be assembled
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Operation requires a connected transport
    #[error("not connected")]
    NotConnected,
}

/// Signals delivered to the transport's sole consumer.
#[derive(Debug, Clone)]
pub enum TransportSignal {
    /// A raw JSON control payload from the remote side
    Message(String),
    /// The connection reached a terminal failure state
    Fault(String),
    /// The remote side closed the connection cleanly
    Closed,
}

/// The single registered consumer of transport signals.
pub type SignalHandler =
    Arc<dyn Fn(TransportSignal) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Handle to the local microphone capture track.
///
/// Enablement toggles without renegotiating the connection; `stop` releases
/// the capture resource and is idempotent.
#[derive(Debug, Default)]
pub struct MicrophoneTrack {
    muted: AtomicBool,
    stopped: AtomicBool,
}

impl MicrophoneTrack {
    /// Create an enabled, live track.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle track enablement. No effect on a stopped track.
    pub fn set_enabled(&self, enabled: bool) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!("ignoring enable toggle on stopped microphone track");
            return;
        }
        self.muted.store(!enabled, Ordering::SeqCst);
    }

    /// Whether the track is currently enabled.
    pub fn is_enabled(&self) -> bool {
        !self.muted.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    /// Release the capture resource. Safe to call repeatedly.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("microphone track stopped");
        }
    }

    /// Whether the track has been released.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Interface shared by both transport variants.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the transport.
    ///
    /// Resolves only after the underlying network handshake completes:
    /// offer/answer negotiation plus event-channel open for the direct
    /// variant, room-join acknowledgment for the relay.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Best-effort send of a control event.
    ///
    /// Events sent before the transport is ready, or after the channel
    /// closed, are dropped and logged rather than queued: a stale
    /// turn-taking signal delivered to a half-open channel is worse than a
    /// dropped one.
    async fn send_event(&self, event: ClientEvent);

    /// Toggle the local microphone track without renegotiating.
    fn set_microphone(&self, enabled: bool);

    /// Register the sole signal consumer. Must be called before `connect`;
    /// a second registration replaces the first.
    fn on_signal(&mut self, handler: SignalHandler);

    /// Scoped teardown: stop local media tracks, close the control channel,
    /// close the connection, in that order, swallowing errors from
    /// already-closed resources. Idempotent.
    async fn disconnect(&mut self);

    /// Whether the transport is connected and ready.
    fn is_ready(&self) -> bool;
}

/// Select and build the transport variant the issued credentials call for.
pub fn create_transport(
    credentials: TransportCredentials,
    settings: &SessionSettings,
) -> Box<dyn Transport> {
    match credentials {
        TransportCredentials::Direct { token, model } => {
            info!(backend = "direct", %model, "transport selected");
            Box::new(DirectTransport::new(
                token,
                model,
                settings.realtime_endpoint.clone(),
                settings.realtime_ws_url.clone(),
            ))
        }
        TransportCredentials::Relay {
            room_name,
            token,
            server_url,
        } => {
            info!(backend = "relay", room = %room_name, "transport selected");
            Box::new(RelayTransport::new(room_name, token, server_url))
        }
    }
}

pub(crate) type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
pub(crate) type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Pump the control channel until it ends.
///
/// Outbound events come in on `rx`; inbound text frames go to the handler as
/// [`TransportSignal::Message`]. A clean remote close yields `Closed`, an
/// I/O error yields `Fault`. Both variants share this loop; only connection
/// establishment differs between them.
pub(crate) fn spawn_channel_pump(
    mut sink: WsSink,
    mut stream: WsStream,
    mut rx: mpsc::Receiver<ClientEvent>,
    handler: Option<SignalHandler>,
    connected: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let deliver = |signal: TransportSignal| {
            let handler = handler.clone();
            async move {
                match handler {
                    Some(h) => h(signal).await,
                    None => trace!("no signal consumer registered, dropping signal"),
                }
            }
        };

        loop {
            tokio::select! {
                outgoing = rx.recv() => {
                    let Some(event) = outgoing else { break };
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            warn!("failed to serialize control event: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        warn!("failed to send control event: {e}");
                        deliver(TransportSignal::Fault(e.to_string())).await;
                        break;
                    }
                }

                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            deliver(TransportSignal::Message(text.to_string())).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = sink.send(Message::Pong(data)).await {
                                warn!("failed to send pong: {e}");
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("control channel closed by remote");
                            deliver(TransportSignal::Closed).await;
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("control channel error: {e}");
                            deliver(TransportSignal::Fault(e.to_string())).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
        debug!("control channel pump ended");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_microphone_track_starts_enabled() {
        let track = MicrophoneTrack::new();
        assert!(track.is_enabled());
        assert!(!track.is_stopped());
    }

    #[test]
    fn test_microphone_toggle() {
        let track = MicrophoneTrack::new();
        track.set_enabled(false);
        assert!(!track.is_enabled());
        track.set_enabled(true);
        assert!(track.is_enabled());
    }

    #[test]
    fn test_microphone_stop_is_idempotent() {
        let track = MicrophoneTrack::new();
        track.stop();
        track.stop();
        assert!(track.is_stopped());
        assert!(!track.is_enabled());
    }

    #[test]
    fn test_stopped_track_ignores_toggle() {
        let track = MicrophoneTrack::new();
        track.stop();
        track.set_enabled(true);
        assert!(!track.is_enabled());
    }

    #[test]
    fn test_factory_selects_direct() {
        let settings = SessionSettings::default();
        let credentials = TransportCredentials::Direct {
            token: "ek".to_string(),
            model: "gpt-realtime".to_string(),
        };
        let transport = create_transport(credentials, &settings);
        assert!(!transport.is_ready());
    }

    #[test]
    fn test_factory_selects_relay() {
        let settings = SessionSettings::default();
        let credentials = TransportCredentials::Relay {
            room_name: "interview-1".to_string(),
            token: "jwt".to_string(),
            server_url: "wss://relay.example".to_string(),
        };
        let transport = create_transport(credentials, &settings);
        assert!(!transport.is_ready());
    }
}
