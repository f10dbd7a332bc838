//! Citation-marker alignment over generated answer text.
//!
//! The generation prompt asks the model to cite retrieved chunks with
//! `[N]` markers. Once a turn's full answer text is known, [`align`] scans
//! it left to right and attributes to each marker the span of text that
//! precedes it: a marker retroactively cites what came before it, not
//! what follows.
//!
//! Span contract (pinned by the tests below): spans are half-open byte
//! ranges into the final answer text. The first span starts at offset 0;
//! each later span starts one character past the previous marker, so the
//! single character immediately following a marker (typically sentence
//! punctuation) is not attributed to the next span. Leading whitespace
//! beyond that character is kept. A span ends at its marker's start, and
//! `start <= end` always holds.
//!
//! Markers whose number falls outside the retrieved set resolve to an
//! empty file name; one malformed citation never aborts the answer.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Citation, CitationReference, Span};

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("marker pattern compiles"));

/// A retrieved chunk a marker can point at, in retrieval order.
#[derive(Debug, Clone)]
pub struct SourceRef {
    pub file_name: String,
    /// Chunk excerpt attached to resolved citations.
    pub excerpt: Option<String>,
}

/// Resolve every `[N]` marker in `text` against `sources` (1-based).
///
/// Citations are returned in marker order, matching the order the spans
/// appear in the text.
pub fn align(text: &str, sources: &[SourceRef]) -> Vec<Citation> {
    let mut citations = Vec::new();
    let mut prev_end: Option<usize> = None;

    for m in MARKER.find_iter(text) {
        let start = match prev_end {
            None => 0,
            Some(end) => {
                // Skip the single character after the previous marker.
                let skipped = text[end..]
                    .chars()
                    .next()
                    .map(|c| end + c.len_utf8())
                    .unwrap_or(end);
                skipped.min(m.start())
            }
        };

        let index: usize = text[m.start() + 1..m.end() - 1].parse().unwrap_or(0);
        let reference = match index.checked_sub(1).and_then(|i| sources.get(i)) {
            Some(source) => CitationReference {
                file_name: source.file_name.clone(),
                text: source.excerpt.clone(),
            },
            None => CitationReference {
                file_name: String::new(),
                text: None,
            },
        };

        citations.push(Citation {
            message_part: Span {
                start,
                end: m.start(),
            },
            references: vec![reference],
        });

        prev_end = Some(m.end());
    }

    citations
}
