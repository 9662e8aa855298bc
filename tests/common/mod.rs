//! Shared fixtures: an in-memory transport double and a wiremock-backed
//! collaborator API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use intervox::config::RetryPolicy;
use intervox::protocol::ClientEvent;
use intervox::session::TransportFactory;
use intervox::transport::{SignalHandler, Transport, TransportError, TransportSignal};
use intervox::SessionSettings;

pub const CANDIDATE_ID: &str = "cand-42";
pub const JOB_ID: &str = "job-7";

#[derive(Default)]
pub struct MockTransportState {
    sent: Mutex<Vec<ClientEvent>>,
    handler: Mutex<Option<SignalHandler>>,
    connected: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    connect_error: Mutex<Option<TransportError>>,
    hang_connect: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    mic_calls: Mutex<Vec<bool>>,
    pump_mode: AtomicBool,
    pump_tx: Mutex<Option<tokio::sync::mpsc::UnboundedSender<TransportSignal>>>,
    pump_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Test-side handle onto the transport the session is driving.
#[derive(Clone)]
pub struct MockHandle(Arc<MockTransportState>);

impl MockHandle {
    pub fn sent_events(&self) -> Vec<ClientEvent> {
        self.0.sent.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.0.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.0.disconnects.load(Ordering::SeqCst)
    }

    pub fn mic_calls(&self) -> Vec<bool> {
        self.0.mic_calls.lock().clone()
    }

    /// Make the next connect attempt fail with this error.
    pub fn fail_next_connect(&self, error: TransportError) {
        *self.0.connect_error.lock() = Some(error);
    }

    /// Make connect attempts block forever.
    pub fn hang_connect(&self) {
        self.0.hang_connect.store(true, Ordering::SeqCst);
    }

    /// Make connect attempts take this long before succeeding.
    pub fn delay_connect(&self, delay: Duration) {
        *self.0.connect_delay.lock() = Some(delay);
    }

    /// Deliver signals the way the real transports do: from a reader task
    /// spawned by connect, which disconnect aborts.
    pub fn enable_pump(&self) {
        self.0.pump_mode.store(true, Ordering::SeqCst);
    }

    /// Queue a signal for the pump task. Requires [`enable_pump`] and a
    /// completed connect.
    pub fn pump(&self, signal: TransportSignal) {
        let tx = self.0.pump_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(signal);
        }
    }

    pub fn pump_json(&self, payload: serde_json::Value) {
        self.pump(TransportSignal::Message(payload.to_string()));
    }

    /// Deliver a signal to the session's registered consumer.
    pub async fn emit(&self, signal: TransportSignal) {
        let handler = self.0.handler.lock().clone();
        if let Some(handler) = handler {
            handler(signal).await;
        }
    }

    /// Deliver a raw JSON payload as an inbound message.
    pub async fn emit_json(&self, payload: serde_json::Value) {
        self.emit(TransportSignal::Message(payload.to_string())).await;
    }
}

struct MockTransport(Arc<MockTransportState>);

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        if self.0.hang_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = self.0.connect_delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.0.connect_error.lock().take() {
            return Err(error);
        }
        if self.0.pump_mode.load(Ordering::SeqCst) {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            *self.0.pump_tx.lock() = Some(tx);
            let handler = self.0.handler.lock().clone();
            let task = tokio::spawn(async move {
                while let Some(signal) = rx.recv().await {
                    if let Some(handler) = &handler {
                        handler(signal).await;
                    }
                }
            });
            *self.0.pump_task.lock() = Some(task);
        }
        self.0.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_event(&self, event: ClientEvent) {
        if self.0.connected.load(Ordering::SeqCst) {
            self.0.sent.lock().push(event);
        }
    }

    fn set_microphone(&self, enabled: bool) {
        self.0.mic_calls.lock().push(enabled);
    }

    fn on_signal(&mut self, handler: SignalHandler) {
        *self.0.handler.lock() = Some(handler);
    }

    async fn disconnect(&mut self) {
        if let Some(task) = self.0.pump_task.lock().take() {
            task.abort();
        }
        *self.0.pump_tx.lock() = None;
        self.0.connected.store(false, Ordering::SeqCst);
        self.0.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn is_ready(&self) -> bool {
        self.0.connected.load(Ordering::SeqCst)
    }
}

/// A transport factory whose product the test can observe and drive.
pub fn mock_transport() -> (TransportFactory, MockHandle) {
    let state = Arc::new(MockTransportState::default());
    let handle = MockHandle(state.clone());
    let factory: TransportFactory =
        Box::new(move |_credentials| Box::new(MockTransport(state.clone())));
    (factory, handle)
}

/// Settings with short timers so session flows complete quickly.
pub fn test_settings(base_url: &str) -> SessionSettings {
    SessionSettings {
        collaborator_base_url: base_url.to_string(),
        collaborator_api_key: None,
        realtime_endpoint: "https://voice.invalid/v1/realtime".to_string(),
        realtime_ws_url: "wss://voice.invalid/v1/realtime".to_string(),
        greeting_delay: Duration::from_millis(40),
        coaching_debounce: Duration::from_millis(40),
        suggestion_cap: 5,
        connect_timeout: Duration::from_secs(2),
        finalize_retry: RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 10,
            max_delay_ms: 20,
            backoff_multiplier: 2.0,
        },
    }
}

/// Stand up a collaborator API that succeeds on every call.
pub async fn collaborator_api() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/candidates/{CANDIDATE_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "Dana Reyes",
            "jobTitle": "Backend Engineer candidate",
            "bioSummary": "Eight years of distributed systems work.",
            "skills": ["rust", "postgres"],
            "jobId": JOB_ID,
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/jobs/{JOB_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "title": "Backend Engineer",
            "description": "Own the ingestion pipeline.",
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/sessions/credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "backend": "direct",
            "token": "ek_test_token",
            "model": "gpt-realtime",
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/coaching/evaluate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "category": "depth",
            "suggestionText": "Ask for concrete numbers.",
            "reasoning": "The answer had no measurable outcome.",
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(wiremock::matchers::path_regex(r"^/interviews/[^/]+/transcript$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    server
}
