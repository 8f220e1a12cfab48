//! Whitespace normalisation and sentence segmentation.
//!
//! Stored reading progress is only an index into the sentence sequence, so
//! everything here is a pure function of its input: the same raw text always
//! yields the same sentences with the same spans.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// One unit of speech and of progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub index: usize,
    pub text: String,
    /// Byte range of `text` inside the normalised document text.
    pub span: Range<usize>,
}

/// Normalised document text together with its sentences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segmented {
    pub text: String,
    pub sentences: Vec<Sentence>,
}

impl Segmented {
    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }
}

/// Collapse every whitespace run to one ASCII space and trim both ends.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for word in raw.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Normalise `raw` and split it into sentences.
pub fn segment(raw: &str) -> Vec<Sentence> {
    segment_document(raw).sentences
}

/// Like [`segment`], but keeps the normalised text the spans point into.
pub fn segment_document(raw: &str) -> Segmented {
    let text = normalize(raw);
    let sentences = split_sentences(&text);
    Segmented { text, sentences }
}

/// Split already-normalised text.
///
/// A sentence runs up to and including its terminal punctuation; a cluster
/// such as `?!` or `...` stays with the sentence it ends. A trailing fragment
/// without punctuation becomes the last sentence. A run with no letters or
/// digits never stands alone: it joins the following sentence, or the
/// previous one at the end of the text.
pub fn split_sentences(text: &str) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminal(c) {
            continue;
        }
        let cluster_continues = chars.peek().is_some_and(|&(_, next)| is_terminal(next));
        if !cluster_continues {
            let end = i + c.len_utf8();
            if has_words(&text[start..end]) {
                push_trimmed(&mut sentences, text, start..end);
                start = end;
            }
        }
    }

    if start < text.len() {
        let rest = &text[start..];
        match sentences.last_mut() {
            Some(last) if !rest.trim().is_empty() && !has_words(rest) => {
                let end = start + rest.trim_end().len();
                last.span.end = end;
                last.text = text[last.span.clone()].to_string();
            }
            _ => push_trimmed(&mut sentences, text, start..text.len()),
        }
    }

    sentences
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn has_words(s: &str) -> bool {
    s.chars().any(char::is_alphanumeric)
}

fn push_trimmed(sentences: &mut Vec<Sentence>, text: &str, range: Range<usize>) {
    let slice = &text[range.clone()];
    let start = range.start + (slice.len() - slice.trim_start().len());
    let end = range.start + slice.trim_end().len();
    if start >= end {
        return;
    }
    sentences.push(Sentence {
        index: sentences.len(),
        text: text[start..end].to_string(),
        span: start..end,
    });
}

/// Clamp a stored position into `0..len` (0 when there is nothing to read).
pub fn clamp_index(position: usize, len: usize) -> usize {
    if len == 0 {
        0
    } else {
        position.min(len - 1)
    }
}
