//! Paragraph-boundary text chunker.
//!
//! Splits each extracted [`Page`] into [`Chunk`]s that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`);
//! a paragraph longer than the limit is hard-split at the nearest newline
//! or space. Chunks never span two pages, so every chunk keeps the label of
//! the page it came from and can be filtered by it later.
//!
//! # Example
//!
//! ```rust
//! use ragchat::chunk::chunk_pages;
//! use ragchat::models::Page;
//!
//! let pages = vec![
//!     Page { label: Some("1".into()), text: "Intro.\n\nScope.".into() },
//!     Page { label: Some("2".into()), text: "Results.".into() },
//! ];
//! let chunks = chunk_pages("report", &pages, 1024);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].page_label.as_deref(), Some("2"));
//! ```

use crate::models::{Chunk, Page};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split pages into chunks of at most `max_tokens` (× 4 chars) each.
///
/// Indices are contiguous across the whole document, starting at 0, and
/// follow page order. Pages with no visible text produce no chunks.
pub fn chunk_pages(document_id: &str, pages: &[Page], max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();

    for page in pages {
        for text in split_text(&page.text, max_chars) {
            chunks.push(Chunk {
                document_id: document_id.to_string(),
                chunk_index: chunks.len() as i64,
                text,
                page_label: page.label.clone(),
            });
        }
    }

    chunks
}

/// Pack paragraphs into pieces of at most `max_chars` bytes.
fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let would_be = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };

        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if para.len() > max_chars {
            hard_split(para, max_chars, &mut pieces);
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
}

/// Split an oversized paragraph, preferring newline then space boundaries.
fn hard_split(para: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = para;
    while !remaining.is_empty() {
        let limit = snap_to_char_boundary(remaining, max_chars);
        let split_at = if limit >= remaining.len() {
            remaining.len()
        } else {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        };
        // A single char wider than the budget still has to make progress.
        let split_at = if split_at == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
