//! Session context loader.
//!
//! Assembles the immutable [`SessionContext`] a session starts with: the
//! candidate record plus the job record it references. At most two reads, no
//! retries, no side effects. A miss on either read fails the load fast; the
//! caller decides whether to retry.

use serde::Deserialize;
use tracing::debug;

use super::{CollaboratorError, authorize, build_http_client, unexpected_status};

/// Candidate record as served by the data collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateRecord {
    name: String,
    job_title: String,
    #[serde(default)]
    bio_summary: String,
    #[serde(default)]
    skills: Vec<String>,
    job_id: String,
}

/// Job record as served by the data collaborator.
#[derive(Debug, Clone, Deserialize)]
struct JobRecord {
    title: String,
    #[serde(default)]
    description: Option<String>,
}

/// Immutable input to one interview session.
///
/// Created once per session start and owned exclusively by the session state
/// machine for that session's lifetime.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Candidate id the session interviews
    pub candidate_id: String,
    /// Job id the candidate applied to
    pub job_id: String,
    /// Candidate display name
    pub candidate_name: String,
    /// Candidate's current role
    pub candidate_role: String,
    /// Short candidate bio
    pub bio_summary: String,
    /// Candidate skills
    pub skills: Vec<String>,
    /// Title of the job being interviewed for
    pub job_title: String,
    /// Full job description, when the job record carries one
    pub job_description: Option<String>,
}

impl SessionContext {
    /// Render the briefing paragraph handed to the evaluation collaborator
    /// with every coaching request.
    pub fn briefing(&self) -> String {
        let mut briefing = format!(
            "Candidate {} ({}) interviewing for {}.",
            self.candidate_name, self.candidate_role, self.job_title
        );
        if !self.skills.is_empty() {
            briefing.push_str(&format!(" Skills: {}.", self.skills.join(", ")));
        }
        if !self.bio_summary.is_empty() {
            briefing.push(' ');
            briefing.push_str(&self.bio_summary);
        }
        briefing
    }
}

/// Client for the context (candidate/job) collaborator.
pub struct ContextClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ContextClient {
    /// Create a client against the collaborator base URL.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: build_http_client(),
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Load the session context for a candidate.
    ///
    /// Performs the candidate read, then the job read keyed by the
    /// candidate's job reference. Either miss yields
    /// [`CollaboratorError::NotFound`].
    pub async fn load(&self, candidate_id: &str) -> Result<SessionContext, CollaboratorError> {
        let candidate = self.fetch_candidate(candidate_id).await?;
        let job = self.fetch_job(&candidate.job_id).await?;
        debug!(
            candidate_id,
            job_id = %candidate.job_id,
            "session context loaded"
        );

        Ok(SessionContext {
            candidate_id: candidate_id.to_string(),
            job_id: candidate.job_id,
            candidate_name: candidate.name,
            candidate_role: candidate.job_title,
            bio_summary: candidate.bio_summary,
            skills: candidate.skills,
            job_title: job.title,
            job_description: job.description,
        })
    }

    async fn fetch_candidate(&self, id: &str) -> Result<CandidateRecord, CollaboratorError> {
        let url = format!("{}/candidates/{}", self.base_url, id);
        let response = authorize(self.http.get(&url), &self.api_key).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CollaboratorError::NotFound {
                kind: "candidate",
                id: id.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(unexpected_status(response).await);
        }
        Ok(response.json().await?)
    }

    async fn fetch_job(&self, id: &str) -> Result<JobRecord, CollaboratorError> {
        let url = format!("{}/jobs/{}", self.base_url, id);
        let response = authorize(self.http.get(&url), &self.api_key).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CollaboratorError::NotFound {
                kind: "job",
                id: id.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(unexpected_status(response).await);
        }
        Ok(response.json().await?)
    }
}
