//! Session finalizer.
//!
//! Runs exactly once per session, on any path out of the live state: user
//! hang-up, transport fault, or remote close. Renders the transcript and
//! hands it to the analytics collaborator. An empty transcript is not
//! submitted; the session still counts as ended.

use std::sync::Arc;

use tracing::{info, warn};

use crate::collaborators::{AnalyticsClient, SessionMeta};

use super::transcript::Transcript;

pub(crate) struct Finalizer {
    analytics: Arc<AnalyticsClient>,
}

impl Finalizer {
    pub(crate) fn new(analytics: Arc<AnalyticsClient>) -> Self {
        Self { analytics }
    }

    /// Submit the rendered transcript. Never blocks session teardown on the
    /// outcome; a final failure is logged as delayed analytics.
    pub(crate) async fn finalize(&self, transcript: &Transcript, meta: &SessionMeta) {
        if transcript.is_empty() {
            info!(session_id = %meta.session_id, "no transcript captured, skipping submission");
            return;
        }

        let blob = transcript.render();
        match self.analytics.submit_transcript(&blob, meta).await {
            Ok(()) => {}
            Err(e) => {
                warn!(
                    session_id = %meta.session_id,
                    error = %e,
                    "transcript submission exhausted retries, analytics may be delayed"
                );
            }
        }
    }
}
