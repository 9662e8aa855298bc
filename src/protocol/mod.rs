//! Control-channel event protocol.
//!
//! Both transport variants deliver JSON control messages over their event
//! channel. This module decodes those raw payloads into a closed set of typed
//! domain events consumed by the session state machine, and defines the
//! client events the machine sends back.
//!
//! # Protocol Overview
//!
//! Inbound events (remote agent to client):
//! - session.ready - Remote model session is attached and ready
//! - speech.started / speech.stopped - Remote (interviewer) voice activity
//! - user_speech.started / user_speech.stopped - Local voice activity
//! - transcript.final - A finalized utterance with its speaker
//! - field.update - Extracted interview fields changed
//! - suggestion - Server-side coaching suggestion
//! - error - Remote-reported error detail
//!
//! Outbound events (client to remote agent):
//! - session.begin - Opening turn-taking signal
//! - input.text - Text injected into the conversation
//!
//! Unrecognized inbound kinds are decoded to [`DomainEvent::Unknown`] and
//! ignored rather than rejected, so newer server-sent event kinds do not
//! break older clients. Malformed payloads are a non-fatal decode error.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error produced for payloads that are not valid protocol JSON.
///
/// Decode failures are diagnostics, never fatal to the session: the caller
/// logs and discards them.
#[derive(Debug, Error)]
#[error("malformed control payload ({reason}): {preview}")]
pub struct DecodeError {
    /// Parser failure description
    reason: String,
    /// Truncated copy of the offending payload for logs
    preview: String,
}

/// Maximum payload length echoed into decode diagnostics.
const PREVIEW_LEN: usize = 120;

/// Who produced an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The AI interviewer
    Interviewer,
    /// The human candidate
    Candidate,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Interviewer => write!(f, "Interviewer"),
            Speaker::Candidate => write!(f, "Candidate"),
        }
    }
}

/// Inbound domain events, decoded from raw control payloads.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// Remote model session is attached and ready
    #[serde(rename = "session.ready")]
    SessionReady,

    /// Remote party started speaking
    #[serde(rename = "speech.started")]
    SpeechStarted,

    /// Remote party stopped speaking
    #[serde(rename = "speech.stopped")]
    SpeechStopped,

    /// Local party started speaking (advisory UI state only)
    #[serde(rename = "user_speech.started")]
    UserSpeechStarted,

    /// Local party stopped speaking (advisory UI state only)
    #[serde(rename = "user_speech.stopped")]
    UserSpeechStopped,

    /// A finalized utterance
    #[serde(rename = "transcript.final")]
    TranscriptFinal {
        /// Who said it
        speaker: Speaker,
        /// What was said
        text: String,
    },

    /// Extracted interview fields changed
    #[serde(rename = "field.update")]
    FieldUpdate {
        /// Field name to value map; merged over previously reported fields
        fields: serde_json::Map<String, Value>,
    },

    /// Server-side coaching suggestion
    #[serde(rename = "suggestion")]
    Suggestion {
        /// Suggestion category (e.g. "follow_up", "depth")
        category: String,
        /// The suggestion itself
        text: String,
        /// Why the server suggests it
        reasoning: String,
    },

    /// Remote-reported error detail (diagnostic, not terminal)
    #[serde(rename = "error")]
    RemoteError {
        /// Error description from the remote side
        detail: String,
    },

    /// Any event kind outside the closed set. Ignored for forward
    /// compatibility with newer server-sent kinds.
    #[serde(other)]
    Unknown,
}

/// Outbound client events sent over the control channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Opening turn-taking signal; prompts the remote party to speak first
    #[serde(rename = "session.begin")]
    Begin,

    /// Inject text into the conversation
    #[serde(rename = "input.text")]
    Text {
        /// The text to inject
        text: String,
    },
}

/// Decode a raw control payload into a domain event.
///
/// Returns [`DomainEvent::Unknown`] for well-formed payloads whose kind is
/// outside the closed set, and an error only for payloads that are not valid
/// protocol JSON at all.
pub fn decode(raw: &str) -> Result<DomainEvent, DecodeError> {
    serde_json::from_str(raw).map_err(|e| DecodeError {
        reason: e.to_string(),
        preview: truncate_preview(raw),
    })
}

fn truncate_preview(raw: &str) -> String {
    if raw.len() <= PREVIEW_LEN {
        raw.to_string()
    } else {
        let cut = raw
            .char_indices()
            .take_while(|(i, _)| *i < PREVIEW_LEN)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &raw[..cut])
    }
}
