//! Bounded, newest-first board of coaching suggestions.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::collaborators::CoachingAdvice;

/// One suggestion as shown on the board.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionEntry {
    pub category: String,
    pub suggestion_text: String,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

impl From<CoachingAdvice> for SuggestionEntry {
    fn from(advice: CoachingAdvice) -> Self {
        Self {
            category: advice.category,
            suggestion_text: advice.suggestion_text,
            reasoning: advice.reasoning,
            created_at: Utc::now(),
        }
    }
}

/// Holds at most `cap` suggestions, newest first. Pushing onto a full board
/// evicts the oldest entry.
#[derive(Debug)]
pub struct SuggestionBoard {
    cap: usize,
    entries: VecDeque<SuggestionEntry>,
}

impl SuggestionBoard {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, entry: SuggestionEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.cap);
    }

    /// Entries newest first.
    pub fn entries(&self) -> Vec<SuggestionEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
