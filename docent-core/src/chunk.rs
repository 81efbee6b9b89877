//! Document chunking.
//!
//! Splits extracted page text into overlapping chunks for embedding.
//! Separators are tried coarsest-first (paragraph, line, sentence, word);
//! a span with no separators at all falls back to a fixed character window.

use crate::extract::PageText;
use crate::types::DocumentChunk;

/// Recursive character splitter with overlap carry.
///
/// Splitting is deterministic and every produced chunk is at most
/// `chunk_size` characters.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    separators: Vec<String>,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s`, or the empty string when `s` is not longer
/// than `n` (carrying the whole text would duplicate the previous chunk).
fn tail_chars(s: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > n {
        chars[chars.len() - n..].iter().collect()
    } else {
        String::new()
    }
}

impl Chunker {
    /// Create a chunker with the default separator ladder.
    ///
    /// `overlap` is clamped below `chunk_size` so the window always advances.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let overlap = overlap.min(chunk_size - 1);
        Self {
            chunk_size,
            overlap,
            separators: vec!["\n\n".into(), "\n".into(), ". ".into(), " ".into()],
        }
    }

    /// Split a single text into chunk strings.
    ///
    /// Empty or whitespace-only input produces no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_level(text, 0)
    }

    /// Split extracted pages into chunks carrying source and page metadata.
    pub fn split_pages(&self, source: &str, pages: &[PageText]) -> Vec<DocumentChunk> {
        let mut chunks = Vec::new();
        for page in pages {
            for text in self.split(&page.text) {
                chunks.push(
                    DocumentChunk::new(text)
                        .with_metadata("source", source)
                        .with_metadata("page", page.number.to_string()),
                );
            }
        }
        chunks
    }

    fn split_level(&self, text: &str, level: usize) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            let trimmed = text.trim();
            return if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            };
        }

        let Some((sep_idx, sep)) = self.find_separator(text, level) else {
            return self.split_fixed(text);
        };
        let sep_chars = char_len(sep);

        let mut chunks = Vec::new();
        let mut current = String::new();

        for part in text.split(sep) {
            let part_chars = char_len(part);

            // A part that alone exceeds the budget is re-split one
            // separator level down.
            if part_chars > self.chunk_size {
                let flushed = current.trim();
                if !flushed.is_empty() {
                    chunks.push(flushed.to_string());
                }
                current = String::new();
                chunks.extend(self.split_level(part, sep_idx + 1));
                continue;
            }

            if char_len(&current) + part_chars + sep_chars > self.chunk_size
                && !current.is_empty()
            {
                let flushed = current.trim();
                if !flushed.is_empty() {
                    chunks.push(flushed.to_string());
                }
                // Carry the overlap tail, shrunk so the next chunk stays
                // within the budget.
                let room = self.chunk_size.saturating_sub(part_chars + sep_chars);
                current = tail_chars(&current, self.overlap.min(room));
            }

            if !current.is_empty() {
                current.push_str(sep);
            }
            current.push_str(part);
        }

        let flushed = current.trim();
        if !flushed.is_empty() {
            chunks.push(flushed.to_string());
        }
        chunks
    }

    /// First separator at or below `level` that actually splits the text.
    fn find_separator(&self, text: &str, level: usize) -> Option<(usize, &str)> {
        for (idx, sep) in self.separators.iter().enumerate().skip(level) {
            if text.split(sep.as_str()).nth(1).is_some() {
                return Some((idx, sep));
            }
        }
        None
    }

    /// Fixed character window with exact overlap.
    fn split_fixed(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end >= chars.len() {
                break;
            }
            start = end.saturating_sub(self.overlap);
        }
        chunks
    }
}
