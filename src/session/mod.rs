//! Live interview session orchestration.
//!
//! [`InterviewSession`] drives one interview end to end: load the candidate
//! and job context, obtain transport credentials, bring the transport up,
//! route remote events into the transcript and coaching pipeline, and hand
//! the finished transcript to analytics on the way out. All observable state
//! is published through a watch channel so a frontend can render from
//! snapshots without holding locks.
//!
//! Lifecycle: `Idle -> Connecting -> Connected -> Disconnected | Failed`.
//! A session runs at most once; ending it on any path preserves whatever
//! transcript was captured.

mod coaching;
mod finalize;
mod suggestions;
mod transcript;

pub use suggestions::{SuggestionBoard, SuggestionEntry};
pub use transcript::{Exchange, Transcript, TranscriptEntry};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::collaborators::{
    AnalyticsClient, CollaboratorError, ContextClient, CredentialClient, EvaluationClient,
    SessionContext, SessionMeta, TransportCredentials,
};
use crate::config::SessionSettings;
use crate::protocol::{ClientEvent, DomainEvent, decode};
use crate::transport::{SignalHandler, Transport, TransportError, TransportSignal, create_transport};

use coaching::CoachingPipeline;
use finalize::Finalizer;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    Connected,
    /// Ended normally, by either side
    Disconnected,
    /// Ended by a fault; transcript up to the fault is preserved
    Failed,
}

impl SessionPhase {
    /// Whether the session has reached a state it cannot leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Disconnected | SessionPhase::Failed)
    }
}

/// Point-in-time view of the session, published on every observable change
/// and once a second while connected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub ai_speaking: bool,
    pub user_speaking: bool,
    pub mic_enabled: bool,
    /// Seconds spent in the connected state; frozen at teardown
    pub elapsed_seconds: u64,
    /// Fault detail, set only in the failed phase
    pub error: Option<String>,
}

/// Errors surfaced from [`InterviewSession::start`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session runs at most once
    #[error("session already started")]
    AlreadyStarted,

    /// Context load or credential issue failed
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// The transport could not be established
    #[error("transport connect failed: {0}")]
    Connect(#[from] TransportError),

    /// The transport did not come up within the configured window
    #[error("transport connect timed out after {0}s")]
    ConnectTimeout(u64),
}

/// Collaborator clients the session depends on.
pub struct SessionDeps {
    pub context: Arc<ContextClient>,
    pub credentials: Arc<CredentialClient>,
    pub evaluation: Arc<EvaluationClient>,
    pub analytics: Arc<AnalyticsClient>,
}

impl SessionDeps {
    /// Build all collaborator clients from one settings block.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        let base = settings.collaborator_base_url.clone();
        let key = settings.collaborator_api_key.clone();
        Self {
            context: Arc::new(ContextClient::new(base.clone(), key.clone())),
            credentials: Arc::new(CredentialClient::new(base.clone(), key.clone())),
            evaluation: Arc::new(EvaluationClient::new(base.clone(), key.clone())),
            analytics: Arc::new(AnalyticsClient::new(
                base,
                key,
                settings.finalize_retry.clone(),
            )),
        }
    }
}

/// Builds a transport from issued credentials. Injectable for tests.
pub type TransportFactory =
    Box<dyn Fn(TransportCredentials) -> Box<dyn Transport> + Send + Sync>;

/// State shared between the session, its background tasks, and the coaching
/// pipeline.
pub(crate) struct SessionShared {
    pub(crate) transcript: Mutex<Transcript>,
    pub(crate) suggestions: Mutex<SuggestionBoard>,
    /// Bumped on teardown; in-flight async work compares it to the value it
    /// captured and discards stale results
    pub(crate) generation: AtomicU64,
    context: Mutex<Option<SessionContext>>,
    /// Set while connected; elapsed time accrues only then
    connected_at: Mutex<Option<Instant>>,
    frozen_elapsed: AtomicU64,
    mic_enabled: AtomicBool,
    ai_speaking: AtomicBool,
    user_speaking: AtomicBool,
    /// Structured fields pushed by the remote side during the interview
    fields: Mutex<serde_json::Map<String, serde_json::Value>>,
}

impl SessionShared {
    fn new(suggestion_cap: usize) -> Self {
        Self {
            transcript: Mutex::new(Transcript::new()),
            suggestions: Mutex::new(SuggestionBoard::new(suggestion_cap)),
            generation: AtomicU64::new(0),
            context: Mutex::new(None),
            connected_at: Mutex::new(None),
            frozen_elapsed: AtomicU64::new(0),
            mic_enabled: AtomicBool::new(true),
            ai_speaking: AtomicBool::new(false),
            user_speaking: AtomicBool::new(false),
            fields: Mutex::new(serde_json::Map::new()),
        }
    }

    /// Seconds spent connected so far. Stops accruing once the connected
    /// anchor is cleared at teardown.
    pub(crate) fn elapsed_seconds(&self) -> u64 {
        let live = self
            .connected_at
            .lock()
            .map(|anchor| anchor.elapsed().as_secs())
            .unwrap_or(0);
        self.frozen_elapsed.load(Ordering::SeqCst) + live
    }

    fn mark_connected(&self) {
        *self.connected_at.lock() = Some(Instant::now());
    }

    fn freeze_elapsed(&self) {
        if let Some(anchor) = self.connected_at.lock().take() {
            self.frozen_elapsed
                .fetch_add(anchor.elapsed().as_secs(), Ordering::SeqCst);
        }
    }

    /// Briefing paragraph for coaching requests, empty before context loads.
    pub(crate) fn briefing(&self) -> String {
        self.context
            .lock()
            .as_ref()
            .map(SessionContext::briefing)
            .unwrap_or_default()
    }
}

/// One live interview session.
pub struct InterviewSession {
    session_id: String,
    candidate_id: String,
    settings: SessionSettings,
    deps: SessionDeps,
    factory: TransportFactory,

    shared: Arc<SessionShared>,
    coaching: Arc<CoachingPipeline>,
    finalizer: Finalizer,

    phase: Mutex<SessionPhase>,
    error: Mutex<Option<String>>,
    transport: tokio::sync::Mutex<Option<Box<dyn Transport>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,

    started: AtomicBool,
    ending: AtomicBool,
    finalized: AtomicBool,
    greeting_sent: AtomicBool,

    snapshot_tx: watch::Sender<SessionSnapshot>,
    /// Self-reference handed to the transport callback and background
    /// tasks, so neither keeps the session alive on its own
    weak_self: Weak<InterviewSession>,
}

impl InterviewSession {
    /// Create a session for a candidate, using the credential-selected
    /// transport variant.
    pub fn new(candidate_id: impl Into<String>, settings: SessionSettings, deps: SessionDeps) -> Arc<Self> {
        let factory_settings = settings.clone();
        Self::with_factory(
            candidate_id,
            settings,
            deps,
            Box::new(move |credentials| create_transport(credentials, &factory_settings)),
        )
    }

    /// Create a session with an injected transport factory.
    pub fn with_factory(
        candidate_id: impl Into<String>,
        settings: SessionSettings,
        deps: SessionDeps,
        factory: TransportFactory,
    ) -> Arc<Self> {
        let shared = Arc::new(SessionShared::new(settings.suggestion_cap));
        let coaching = Arc::new(CoachingPipeline::new(
            deps.evaluation.clone(),
            settings.coaching_debounce,
        ));
        let finalizer = Finalizer::new(deps.analytics.clone());
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        let candidate_id = candidate_id.into();

        Arc::new_cyclic(|weak_self| Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            candidate_id,
            settings,
            deps,
            factory,
            shared,
            coaching,
            finalizer,
            phase: Mutex::new(SessionPhase::Idle),
            error: Mutex::new(None),
            transport: tokio::sync::Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            ending: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            greeting_sent: AtomicBool::new(false),
            snapshot_tx,
            weak_self: weak_self.clone(),
        })
    }

    /// Start the session: load context, obtain credentials, connect the
    /// transport, and begin the interview.
    ///
    /// Runs at most once per session; later calls fail without side effects,
    /// whatever the first call's outcome was. An `end()` that lands while the
    /// connect is in flight cancels the start: the freshly built transport is
    /// released and the session stays in its terminal phase.
    pub async fn start(&self) -> Result<(), SessionError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyStarted);
        }
        self.set_phase(SessionPhase::Connecting);
        info!(session_id = %self.session_id, candidate_id = %self.candidate_id, "starting session");

        let context = match self.deps.context.load(&self.candidate_id).await {
            Ok(context) => context,
            Err(e) => {
                self.fail_setup(e.to_string());
                return Err(e.into());
            }
        };
        info!(candidate = %context.candidate_name, job = %context.job_title, "context loaded");
        *self.shared.context.lock() = Some(context);

        let credentials = match self
            .deps
            .credentials
            .issue(&self.session_id, &self.candidate_id)
            .await
        {
            Ok(credentials) => credentials,
            Err(e) => {
                self.fail_setup(e.to_string());
                return Err(e.into());
            }
        };

        let mut transport = (self.factory)(credentials);
        transport.on_signal(self.signal_handler());

        let timeout = self.settings.connect_timeout;
        match tokio::time::timeout(timeout, transport.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.fail_setup(e.to_string());
                return Err(e.into());
            }
            Err(_) => {
                transport.disconnect().await;
                let e = SessionError::ConnectTimeout(timeout.as_secs());
                self.fail_setup(e.to_string());
                return Err(e);
            }
        }
        // Commit under the transport lock, which teardown also takes: the
        // session may have been ended (or faulted) while connect was in
        // flight, and a terminal phase must never be overwritten.
        {
            let mut slot = self.transport.lock().await;
            if self.ending.load(Ordering::SeqCst) {
                drop(slot);
                transport.disconnect().await;
                info!(session_id = %self.session_id, "session ended during connect, discarding transport");
                return Ok(());
            }
            *slot = Some(transport);

            self.shared.mark_connected();
            self.set_phase(SessionPhase::Connected);
            info!(session_id = %self.session_id, "session connected");

            self.spawn_greeting();
            self.spawn_ticker();
        }
        Ok(())
    }

    /// End the session and release the transport. Safe to call from any
    /// phase, any number of times; only the first live call tears down.
    pub async fn end(&self) {
        if self.ending.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session_id = %self.session_id, "ending session");
        self.teardown().await;
        if !self.phase().is_terminal() {
            self.set_phase(SessionPhase::Disconnected);
        }
        self.finalize_once().await;
    }

    /// Forward a typed message into the live conversation. Best-effort:
    /// dropped silently when the session is not connected.
    pub async fn send_text(&self, text: impl Into<String>) {
        if self.phase() != SessionPhase::Connected {
            return;
        }
        if let Some(transport) = self.transport.lock().await.as_ref() {
            transport.send_event(ClientEvent::Text { text: text.into() }).await;
        }
    }

    /// Toggle the local microphone.
    pub async fn toggle_microphone(&self, enabled: bool) {
        self.shared.mic_enabled.store(enabled, Ordering::SeqCst);
        if let Some(transport) = self.transport.lock().await.as_ref() {
            transport.set_microphone(enabled);
        }
        self.publish();
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// The transcript captured so far, rendered as speaker-prefixed lines.
    pub fn transcript_text(&self) -> String {
        self.shared.transcript.lock().render()
    }

    /// Current coaching suggestions, newest first.
    pub fn suggestions(&self) -> Vec<SuggestionEntry> {
        self.shared.suggestions.lock().entries()
    }

    /// Structured fields the remote side has filled in so far.
    pub fn fields(&self) -> serde_json::Map<String, serde_json::Value> {
        self.shared.fields.lock().clone()
    }

    fn signal_handler(&self) -> SignalHandler {
        // Weak reference: the transport outlives its registration inside
        // this session, so a strong cycle here would leak both.
        let weak = self.weak_self.clone();
        Arc::new(move |signal| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(session) = weak.upgrade() {
                    session.handle_signal(signal).await;
                }
            })
        })
    }

    async fn handle_signal(&self, signal: TransportSignal) {
        match signal {
            TransportSignal::Message(raw) => match decode(&raw) {
                Ok(event) => self.apply_event(event).await,
                // One bad payload must not take the session down.
                Err(e) => warn!(session_id = %self.session_id, "ignoring payload: {e}"),
            },
            // Fault and close trigger teardown, and teardown aborts the pump
            // task that is executing this handler. Run them on their own
            // task, or the abort cancels finalization mid-flight.
            TransportSignal::Fault(detail) => {
                if let Some(session) = self.weak_self.upgrade() {
                    tokio::spawn(async move { session.handle_fault(detail).await });
                }
            }
            TransportSignal::Closed => {
                if self.phase() == SessionPhase::Connected {
                    info!(session_id = %self.session_id, "remote side closed the session");
                    if let Some(session) = self.weak_self.upgrade() {
                        tokio::spawn(async move { session.end().await });
                    }
                }
            }
        }
    }

    async fn apply_event(&self, event: DomainEvent) {
        if self.phase() != SessionPhase::Connected {
            trace!("dropping event outside connected phase");
            return;
        }
        match event {
            DomainEvent::SessionReady => debug!("remote session ready"),
            DomainEvent::SpeechStarted => {
                self.shared.ai_speaking.store(true, Ordering::SeqCst);
                self.publish();
            }
            DomainEvent::SpeechStopped => {
                self.shared.ai_speaking.store(false, Ordering::SeqCst);
                self.publish();
            }
            DomainEvent::UserSpeechStarted => {
                self.shared.user_speaking.store(true, Ordering::SeqCst);
                self.publish();
            }
            DomainEvent::UserSpeechStopped => {
                self.shared.user_speaking.store(false, Ordering::SeqCst);
                self.publish();
            }
            DomainEvent::TranscriptFinal { speaker, text } => {
                debug!(%speaker, chars = text.len(), "transcript turn finalized");
                self.shared.transcript.lock().append(speaker, text);
                self.publish();
                self.coaching.notify(self.shared.clone());
            }
            DomainEvent::FieldUpdate { fields } => {
                let mut current = self.shared.fields.lock();
                for (key, value) in fields {
                    current.insert(key, value);
                }
            }
            DomainEvent::Suggestion {
                category,
                text,
                reasoning,
            } => {
                self.shared.suggestions.lock().push(SuggestionEntry {
                    category,
                    suggestion_text: text,
                    reasoning,
                    created_at: chrono::Utc::now(),
                });
            }
            DomainEvent::RemoteError { detail } => {
                warn!(session_id = %self.session_id, "remote error event: {detail}");
            }
            DomainEvent::Unknown => trace!("ignoring unrecognized event kind"),
        }
    }

    /// Transport-level fault while live: preserve the transcript, mark the
    /// session failed, finalize.
    async fn handle_fault(&self, detail: String) {
        if self.ending.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(session_id = %self.session_id, "session fault: {detail}");
        self.teardown().await;
        *self.error.lock() = Some(detail);
        self.set_phase(SessionPhase::Failed);
        self.finalize_once().await;
    }

    /// Collaborator or transport failure during start, before the session
    /// went live.
    fn fail_setup(&self, detail: String) {
        warn!(session_id = %self.session_id, "session setup failed: {detail}");
        *self.error.lock() = Some(detail);
        self.set_phase(SessionPhase::Failed);
    }

    /// Shared teardown: stop in-flight async work, drop the transport.
    ///
    /// Takes the transport lock around the task drain so it serializes with
    /// `start`'s commit block: either the commit sees the ending latch and
    /// discards its transport, or teardown runs after the commit and finds
    /// both the transport and the spawned tasks.
    async fn teardown(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.coaching.cancel();
        let transport = {
            let mut slot = self.transport.lock().await;
            for task in self.tasks.lock().drain(..) {
                task.abort();
            }
            slot.take()
        };
        if let Some(mut transport) = transport {
            transport.disconnect().await;
        }
        self.shared.freeze_elapsed();
    }

    async fn finalize_once(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        let job_id = self
            .shared
            .context
            .lock()
            .as_ref()
            .map(|c| c.job_id.clone())
            .unwrap_or_default();
        let meta = SessionMeta {
            session_id: self.session_id.clone(),
            candidate_id: self.candidate_id.clone(),
            job_id,
            duration_seconds: self.shared.elapsed_seconds(),
        };
        let transcript = self.shared.transcript.lock().clone();
        self.finalizer.finalize(&transcript, &meta).await;
    }

    /// One delayed opening nudge so the interviewer speaks first. Sent at
    /// most once, and only if the session is still live when the delay ends.
    fn spawn_greeting(&self) {
        let weak = self.weak_self.clone();
        let delay = self.settings.greeting_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(session) = weak.upgrade() else { return };
            if session.phase() != SessionPhase::Connected {
                return;
            }
            if session.greeting_sent.swap(true, Ordering::SeqCst) {
                return;
            }
            debug!(session_id = %session.session_id, "sending opening greeting");
            if let Some(transport) = session.transport.lock().await.as_ref() {
                transport.send_event(ClientEvent::Begin).await;
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Publishes a snapshot once a second while connected so elapsed time
    /// advances for subscribers.
    fn spawn_ticker(&self) {
        let weak = self.weak_self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(session) = weak.upgrade() else { break };
                if session.phase() != SessionPhase::Connected {
                    break;
                }
                session.publish();
            }
        });
        self.tasks.lock().push(handle);
    }

    fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock() = phase;
        self.publish();
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            phase: self.phase(),
            ai_speaking: self.shared.ai_speaking.load(Ordering::SeqCst),
            user_speaking: self.shared.user_speaking.load(Ordering::SeqCst),
            mic_enabled: self.shared.mic_enabled.load(Ordering::SeqCst),
            elapsed_seconds: self.shared.elapsed_seconds(),
            error: self.error.lock().clone(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}
