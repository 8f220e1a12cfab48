//! In-memory state for the book being read.

use serde::Serialize;

use super::PlaybackState;
use crate::library::Book;
use crate::segment::{clamp_index, Segmented, Sentence};

/// The loaded book, its sentences and the cursor into them.
#[derive(Debug, Clone)]
pub struct ReadingSession {
    book: Book,
    document: Segmented,
    current_index: usize,
}

impl ReadingSession {
    /// `position` is clamped into the sentence range.
    pub fn new(book: Book, document: Segmented, position: usize) -> Self {
        let current_index = clamp_index(position, document.len());
        Self {
            book,
            document,
            current_index,
        }
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.document.sentences
    }

    /// Normalised text the sentence spans point into.
    pub fn text(&self) -> &str {
        &self.document.text
    }

    pub fn len(&self) -> usize {
        self.document.len()
    }

    /// True when the book has nothing to read.
    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_sentence(&self) -> Option<&Sentence> {
        self.document.sentences.get(self.current_index)
    }

    /// Move forward one sentence; false at the last one.
    pub fn advance(&mut self) -> bool {
        if self.current_index + 1 < self.len() {
            self.current_index += 1;
            true
        } else {
            false
        }
    }

    /// Move back one sentence; false at the first one.
    pub fn retreat(&mut self) -> bool {
        if self.current_index > 0 {
            self.current_index -= 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn record_position(&mut self, index: usize) {
        self.book.last_position = index;
    }
}

/// Read-only view of the session for renderers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub book_id: u64,
    pub title: String,
    pub sentence_count: usize,
    pub current_index: usize,
    pub current_text: Option<String>,
    pub state: PlaybackState,
}

impl SessionSnapshot {
    pub(crate) fn capture(session: &ReadingSession, state: PlaybackState) -> Self {
        Self {
            book_id: session.book.id,
            title: session.book.title.clone(),
            sentence_count: session.len(),
            current_index: session.current_index,
            current_text: session.current_sentence().map(|s| s.text.clone()),
            state,
        }
    }
}
