//! Append-only interview transcript.
//!
//! Entries are recorded in arrival order of their final-transcript events.
//! With the remote side transcribed faster than local speech, an answer can
//! land before the question that prompted it; consumers that need a paired
//! question and answer use [`Transcript::latest_exchange`], which scans for
//! adjacency rather than assuming strict alternation.

use chrono::{DateTime, Utc};

use crate::protocol::Speaker;

/// One finalized utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A completed question/answer pair, interviewer turn followed by the
/// candidate turn that answered it.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

impl Exchange {
    /// Stable identity for this pair. Two exchanges with the same question
    /// and answer text are the same exchange.
    pub fn fingerprint(&self) -> String {
        // Unit separator keeps "a" + "bc" distinct from "ab" + "c".
        format!("{}\u{1f}{}", self.question, self.answer)
    }

    /// Render the pair in speaker-prefixed form.
    pub fn render(&self) -> String {
        format!(
            "{}: {}\n{}: {}",
            Speaker::Interviewer,
            self.question,
            Speaker::Candidate,
            self.answer
        )
    }
}

/// Ordered collection of finalized utterances.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finalized utterance at the current instant.
    pub fn append(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent interviewer turn immediately followed by a candidate
    /// turn, if any pair has completed.
    pub fn latest_exchange(&self) -> Option<Exchange> {
        self.entries
            .windows(2)
            .rev()
            .find(|pair| {
                pair[0].speaker == Speaker::Interviewer && pair[1].speaker == Speaker::Candidate
            })
            .map(|pair| Exchange {
                question: pair[0].text.clone(),
                answer: pair[1].text.clone(),
            })
    }

    /// Render the full transcript as newline-separated "Speaker: text" lines.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{}: {}", entry.speaker, entry.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
