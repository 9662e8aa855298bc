//! HTTP clients for the external collaborators of the session layer.
//!
//! The session layer owns no durable state. Everything it reads (candidate
//! and job context, transport credentials) and writes (coaching evaluation
//! requests, the final transcript) goes through the collaborator API defined
//! by the surrounding product. These clients are deliberately thin: one
//! struct per collaborator, typed request/response bodies, no retries except
//! where a call's failure would lose data.

use std::time::Duration;

use thiserror::Error;

pub mod analytics;
pub mod context;
pub mod credentials;
pub mod evaluation;

pub use analytics::{AnalyticsClient, AnalyticsReport, SessionMeta};
pub use context::{ContextClient, SessionContext};
pub use credentials::{CredentialClient, TransportCredentials};
pub use evaluation::{CoachingAdvice, EvaluationClient, ExchangeReview};

/// Default per-request timeout for collaborator calls.
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Errors from collaborator calls.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// A looked-up record does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind ("candidate", "job", ...)
        kind: &'static str,
        /// The id that missed
        id: String,
    },

    /// Transport-level HTTP failure
    #[error("collaborator request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The collaborator answered with an unexpected status
    #[error("collaborator returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Response body, truncated for logs
        body: String,
    },
}

/// Build the shared HTTP client used by all collaborator clients.
pub(crate) fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_default()
}

/// Attach the bearer token when the deployment requires one.
pub(crate) fn authorize(
    request: reqwest::RequestBuilder,
    api_key: &Option<String>,
) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

/// Turn a non-success response into a typed error, truncating the body.
pub(crate) async fn unexpected_status(response: reqwest::Response) -> CollaboratorError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let body = if body.chars().count() > 200 {
        format!("{}...", body.chars().take(200).collect::<String>())
    } else {
        body
    };
    CollaboratorError::UnexpectedStatus { status, body }
}
