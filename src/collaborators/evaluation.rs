//! Evaluation collaborator client.
//!
//! The coaching pipeline posts each completed (question, answer) exchange
//! here and gets advisory next-question guidance back. Coaching is
//! best-effort: callers log and drop failures, never retry or block on them.

use serde::{Deserialize, Serialize};

use super::{CollaboratorError, authorize, build_http_client, unexpected_status};

/// One coaching request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeReview {
    /// The just-completed question/answer pair
    pub last_exchange: String,
    /// The whole transcript so far, snapshot taken at send time
    pub full_transcript: String,
    /// Minutes the session has been connected
    pub elapsed_minutes: u64,
    /// Candidate/job briefing paragraph
    pub briefing_context: String,
}

/// Advisory guidance returned by the evaluation collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachingAdvice {
    /// Suggestion category
    pub category: String,
    /// The suggested next move
    pub suggestion_text: String,
    /// Why the collaborator suggests it
    pub reasoning: String,
}

/// Client for the evaluation collaborator.
pub struct EvaluationClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl EvaluationClient {
    /// Create a client against the collaborator base URL.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: build_http_client(),
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Request coaching advice for a completed exchange.
    pub async fn review(&self, review: &ExchangeReview) -> Result<CoachingAdvice, CollaboratorError> {
        let url = format!("{}/coaching/evaluate", self.base_url);
        let response = authorize(self.http.post(&url), &self.api_key)
            .json(review)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(unexpected_status(response).await);
        }
        Ok(response.json().await?)
    }
}
