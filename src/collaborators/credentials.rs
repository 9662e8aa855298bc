//! Transport credential issuing.
//!
//! Each session start asks the credential collaborator for connection
//! material. The response's `backend` tag decides which transport variant the
//! session opens: an ephemeral token for the direct peer connection, or a
//! room grant for the managed relay. The tag is the strategy selector; the
//! client never hardcodes a backend.

use serde::Deserialize;
use tracing::debug;

use super::{CollaboratorError, authorize, build_http_client, unexpected_status};

/// Connection material for one session, tagged by backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum TransportCredentials {
    /// Direct peer connection to the hosted realtime endpoint.
    Direct {
        /// Short-lived token scoped to this session
        token: String,
        /// Model identifier for the realtime endpoint
        model: String,
    },
    /// Managed room relay.
    #[serde(rename_all = "camelCase")]
    Relay {
        /// Room to join
        room_name: String,
        /// Participant token
        token: String,
        /// Relay signaling URL
        server_url: String,
    },
}

impl TransportCredentials {
    /// Backend label for logs.
    pub fn backend(&self) -> &'static str {
        match self {
            TransportCredentials::Direct { .. } => "direct",
            TransportCredentials::Relay { .. } => "relay",
        }
    }
}

/// Client for the credential-issuing collaborator.
pub struct CredentialClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl CredentialClient {
    /// Create a client against the collaborator base URL.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: build_http_client(),
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Issue credentials for a new session.
    pub async fn issue(
        &self,
        session_id: &str,
        candidate_id: &str,
    ) -> Result<TransportCredentials, CollaboratorError> {
        let url = format!("{}/sessions/credentials", self.base_url);
        let response = authorize(self.http.post(&url), &self.api_key)
            .json(&serde_json::json!({
                "sessionId": session_id,
                "candidateId": candidate_id,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(unexpected_status(response).await);
        }

        let credentials: TransportCredentials = response.json().await?;
        debug!(backend = credentials.backend(), "session credentials issued");
        Ok(credentials)
    }
}
