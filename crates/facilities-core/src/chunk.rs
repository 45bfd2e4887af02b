//! Recursive character text splitter.
//!
//! Splits extracted document text into overlapping chunks of at most
//! `chunk_size` characters, sharing up to `chunk_overlap` characters with the
//! previous chunk. Chunk size and overlap control the retrieval granularity
//! and recall tradeoff, so both are explicit (defaults: 1000 / 200).
//!
//! # Algorithm
//!
//! 1. Pick the first separator from `["\n\n", "\n", " ", ""]` that occurs in
//!    the text (the empty separator splits into characters).
//! 2. Split on it, dropping empty pieces.
//! 3. Pieces shorter than `chunk_size` are greedily merged (joined with the
//!    separator) into windows no longer than `chunk_size`; when a window is
//!    emitted, pieces are dropped from its front until at most
//!    `chunk_overlap` characters remain to seed the next window.
//! 4. Pieces that are themselves too long are split recursively with the
//!    remaining, finer separators.
//!
//! Lengths are counted in `char`s, never bytes, so multi-byte text is never
//! split inside a code point.
//!
//! # Example
//!
//! ```rust
//! use facilities_core::chunk::TextSplitter;
//!
//! let splitter = TextSplitter::new(1000, 200);
//! let chunks = splitter.split_text("Hello world.\n\nSecond paragraph.");
//! assert_eq!(chunks, vec!["Hello world.\n\nSecond paragraph.".to_string()]);
//! ```

use std::collections::VecDeque;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Text extracted from one document, page by page.
///
/// Formats without pagination (plain text, docx) carry a single page and
/// set `paginated = false`; their chunks are then located by byte offset.
#[derive(Debug, Clone)]
pub struct DocumentText {
    pub pages: Vec<String>,
    pub paginated: bool,
}

impl DocumentText {
    pub fn paginated(pages: Vec<String>) -> Self {
        Self {
            pages,
            paginated: true,
        }
    }

    pub fn single(text: String) -> Self {
        Self {
            pages: vec![text],
            paginated: false,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.trim().is_empty())
    }
}

/// A chunk of text plus its position in the source document.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitChunk {
    pub text: String,
    pub page_or_offset: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    /// Split a whole document, tagging each chunk with its page number
    /// (paginated formats) or the byte offset where it starts.
    pub fn split_document(&self, doc: &DocumentText) -> Vec<SplitChunk> {
        let mut out = Vec::new();
        for (page_no, page) in doc.pages.iter().enumerate() {
            let pieces = self.split_text(page);
            if doc.paginated {
                out.extend(pieces.into_iter().map(|text| SplitChunk {
                    text,
                    page_or_offset: page_no as i64,
                }));
                continue;
            }

            // Best-effort offsets: a merged chunk may not occur verbatim when
            // runs of separators were collapsed, in which case the cursor
            // position is used.
            let mut cursor = 0usize;
            for text in pieces {
                let offset = page[cursor..]
                    .find(text.as_str())
                    .map(|pos| cursor + pos)
                    .unwrap_or(cursor);
                out.push(SplitChunk {
                    text,
                    page_or_offset: offset as i64,
                });
                cursor = next_char_boundary(page, offset);
            }
        }
        out
    }

    /// Split a single string into overlapping chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let splits: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut short: Vec<&str> = Vec::new();
        for piece in splits {
            if char_len(piece) < self.chunk_size {
                short.push(piece);
                continue;
            }
            if !short.is_empty() {
                chunks.extend(self.merge_splits(&short, separator));
                short.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }
        if !short.is_empty() {
            chunks.extend(self.merge_splits(&short, separator));
        }
        chunks
    }

    fn merge_splits(&self, splits: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut docs = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in splits {
            let len = char_len(piece);
            let joiner = if window.is_empty() { 0 } else { sep_len };

            if total + len + joiner > self.chunk_size && !window.is_empty() {
                push_joined(&mut docs, &window, separator);

                // Shrink from the front until the remainder fits the overlap
                // budget and leaves room for the incoming piece.
                loop {
                    let joiner = if window.is_empty() { 0 } else { sep_len };
                    let over_overlap = total > self.chunk_overlap;
                    let no_room = total + len + joiner > self.chunk_size && total > 0;
                    if !(over_overlap || no_room) {
                        break;
                    }
                    let Some(first) = window.pop_front() else {
                        break;
                    };
                    let dropped_joiner = if window.is_empty() { 0 } else { sep_len };
                    total = total.saturating_sub(char_len(first) + dropped_joiner);
                }
            }

            window.push_back(piece);
            total += len + if window.len() > 1 { sep_len } else { 0 };
        }

        push_joined(&mut docs, &window, separator);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn next_char_boundary(s: &str, from: usize) -> usize {
    let mut idx = from + 1;
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx.min(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = TextSplitter::default().split_text("Hello, world!");
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(TextSplitter::default().split_text("").is_empty());
        assert!(TextSplitter::default().split_text("   \n\n  ").is_empty());
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = (0..400)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let splitter = TextSplitter::new(100, 20);
        let chunks = splitter.split_text(&text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 100, "chunk too long: {}", c.len());
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = (0..200)
            .map(|i| format!("w{:03}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = TextSplitter::new(50, 20).split_text(&text);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split(' ').last().unwrap();
            assert!(
                pair[1].contains(last_word),
                "expected '{}' to carry over into '{}'",
                last_word,
                pair[1]
            );
        }
    }

    #[test]
    fn test_zero_overlap_partitions_words() {
        let text = "aa bb cc dd ee ff gg hh";
        let chunks = TextSplitter::new(5, 0).split_text(text);
        assert_eq!(chunks, vec!["aa bb", "cc dd", "ee ff", "gg hh"]);
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let para_a = "a".repeat(60);
        let para_b = "b".repeat(60);
        let text = format!("{}\n\n{}", para_a, para_b);
        let chunks = TextSplitter::new(100, 0).split_text(&text);
        assert_eq!(chunks, vec![para_a, para_b]);
    }

    #[test]
    fn test_unbroken_text_falls_back_to_characters() {
        let text = "x".repeat(25);
        let chunks = TextSplitter::new(10, 0).split_text(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn test_multibyte_text_is_safe() {
        let text = "é".repeat(30);
        let chunks = TextSplitter::new(8, 2).split_text(&text);
        for c in &chunks {
            assert!(c.chars().count() <= 8);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma.\n\nDelta epsilon.\nZeta eta theta iota.";
        let a = TextSplitter::new(20, 5).split_text(text);
        let b = TextSplitter::new(20, 5).split_text(text);
        assert_eq!(a, b);
    }

    #[test]
    fn test_paginated_document_uses_page_numbers() {
        let doc = DocumentText::paginated(vec![
            "first page".to_string(),
            String::new(),
            "third page".to_string(),
        ]);
        let chunks = TextSplitter::default().split_document(&doc);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page_or_offset, 0);
        assert_eq!(chunks[1].page_or_offset, 2);
    }

    #[test]
    fn test_unpaginated_document_uses_offsets() {
        let doc = DocumentText::single("aa bb cc dd".to_string());
        let chunks = TextSplitter::new(5, 0).split_document(&doc);
        let offsets: Vec<i64> = chunks.iter().map(|c| c.page_or_offset).collect();
        assert_eq!(offsets, vec![0, 6]);
    }
}
