//! Debounced coaching pipeline.
//!
//! Every finalized transcript turn nudges the pipeline; the actual review
//! request fires only after the transcript has been quiet for the debounce
//! window, so a burst of rapid turns costs one request. Each (question,
//! answer) pair is reviewed at most once per session regardless of how many
//! notifications it survives, and the request body is assembled from the
//! transcript as it stands at send time, not at notification time.
//!
//! The whole pipeline is advisory. Failures are logged and dropped; a
//! suggestion that arrives after the session moved on is discarded.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::collaborators::{EvaluationClient, ExchangeReview};

use super::SessionShared;

pub(crate) struct CoachingPipeline {
    evaluation: Arc<EvaluationClient>,
    debounce: Duration,
    last_fingerprint: Mutex<Option<String>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl CoachingPipeline {
    pub(crate) fn new(evaluation: Arc<EvaluationClient>, debounce: Duration) -> Self {
        Self {
            evaluation,
            debounce,
            last_fingerprint: Mutex::new(None),
            pending: Mutex::new(None),
        }
    }

    /// Note transcript movement. Restarts the debounce window; only the
    /// final notification in a burst produces a request.
    pub(crate) fn notify(self: &Arc<Self>, shared: Arc<SessionShared>) {
        let generation = shared.generation.load(Ordering::SeqCst);
        let pipeline = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(pipeline.debounce).await;
            pipeline.fire(shared, generation).await;
        });
        if let Some(previous) = self.pending.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop any pending debounce timer. Called on session teardown.
    pub(crate) fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }

    async fn fire(&self, shared: Arc<SessionShared>, generation: u64) {
        if shared.generation.load(Ordering::SeqCst) != generation {
            debug!("skipping coaching request, session moved on");
            return;
        }

        // Snapshot the transcript as it stands now, not as it stood when
        // the notification arrived.
        let (exchange, full_transcript) = {
            let transcript = shared.transcript.lock();
            match transcript.latest_exchange() {
                Some(exchange) => (exchange, transcript.render()),
                None => return,
            }
        };

        let fingerprint = exchange.fingerprint();
        {
            let mut last = self.last_fingerprint.lock();
            if last.as_deref() == Some(fingerprint.as_str()) {
                debug!("skipping coaching request, exchange already reviewed");
                return;
            }
            // Mark before sending so a failed request is not retried.
            *last = Some(fingerprint);
        }

        let review = ExchangeReview {
            last_exchange: exchange.render(),
            full_transcript,
            elapsed_minutes: shared.elapsed_seconds() / 60,
            briefing_context: shared.briefing(),
        };

        match self.evaluation.review(&review).await {
            Ok(advice) => {
                // The response may have crossed session teardown.
                if shared.generation.load(Ordering::SeqCst) != generation {
                    debug!("discarding coaching advice, session moved on");
                    return;
                }
                debug!(category = %advice.category, "coaching advice received");
                shared.suggestions.lock().push(advice.into());
            }
            Err(e) => warn!("coaching request failed, dropping: {e}"),
        }
    }
}
