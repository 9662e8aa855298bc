//! Analytics/persistence collaborator client.
//!
//! At session end the finalizer submits the full transcript here; the
//! collaborator generates interview analytics asynchronously and a later read
//! returns the report once ready. Submission is the one collaborator call
//! with real data-loss consequence, so it retries with bounded exponential
//! backoff before giving up.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RetryPolicy;

use super::{CollaboratorError, authorize, build_http_client, unexpected_status};

/// Identity of a finished session, attached to the transcript submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    /// Session id
    pub session_id: String,
    /// Candidate interviewed
    pub candidate_id: String,
    /// Job interviewed for
    pub job_id: String,
    /// Seconds the session spent connected
    pub duration_seconds: u64,
}

/// Analytics report, available some time after submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    /// Overall interview score
    pub overall_score: f64,
    /// Hire/no-hire style recommendation
    pub recommendation: String,
    /// Narrative summary
    pub summary: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    transcript: &'a str,
    #[serde(flatten)]
    meta: &'a SessionMeta,
}

/// Client for the analytics-generation collaborator.
pub struct AnalyticsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl AnalyticsClient {
    /// Create a client against the collaborator base URL.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, retry: RetryPolicy) -> Self {
        Self {
            http: build_http_client(),
            base_url: base_url.into(),
            api_key,
            retry,
        }
    }

    /// Submit the final transcript, retrying transient failures.
    ///
    /// Returns the error of the last attempt when all attempts fail; the
    /// caller logs it and marks the session ended regardless.
    pub async fn submit_transcript(
        &self,
        transcript: &str,
        meta: &SessionMeta,
    ) -> Result<(), CollaboratorError> {
        let url = format!("{}/interviews/{}/transcript", self.base_url, meta.session_id);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.try_submit(&url, transcript, meta).await {
                Ok(()) => {
                    info!(
                        session_id = %meta.session_id,
                        attempt,
                        "transcript submitted for analytics"
                    );
                    return Ok(());
                }
                Err(e) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.calculate_delay(attempt);
                    warn!(
                        session_id = %meta.session_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transcript submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_submit(
        &self,
        url: &str,
        transcript: &str,
        meta: &SessionMeta,
    ) -> Result<(), CollaboratorError> {
        let response = authorize(self.http.post(url), &self.api_key)
            .json(&SubmitBody { transcript, meta })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(unexpected_status(response).await);
        }
        Ok(())
    }

    /// Fetch the analytics report, once generation has finished.
    ///
    /// Returns `Ok(None)` while the report is still pending.
    pub async fn fetch_report(
        &self,
        session_id: &str,
    ) -> Result<Option<AnalyticsReport>, CollaboratorError> {
        let url = format!("{}/interviews/{}/report", self.base_url, session_id);
        let response = authorize(self.http.get(&url), &self.api_key).send().await?;

        match response.status() {
            reqwest::StatusCode::OK => Ok(Some(response.json().await?)),
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::ACCEPTED => Ok(None),
            _ => Err(unexpected_status(response).await),
        }
    }
}
