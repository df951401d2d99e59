//! Recursive character text splitter.
//!
//! Splits extracted text into overlapping chunks of at most `chunk_size`
//! characters. The splitter tries coarse separators first (paragraphs, then
//! lines, then words) and only falls back to a hard character split for runs
//! of text with no separator at all. Pieces that fit are merged greedily,
//! carrying up to `chunk_overlap` characters from the end of one chunk into
//! the start of the next.
//!
//! Sizes are counted in `char`s, not bytes, so multi-byte text never splits
//! inside a code point.

use std::collections::VecDeque;

use crate::config::ChunkingConfig;

const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Deterministic id of a stored chunk: re-indexing the same file overwrites
/// rather than duplicates.
pub fn chunk_id(source_path: &str, chunk_index: usize) -> String {
    format!("{}#{}", source_path, chunk_index)
}

#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// `chunk_overlap` is clamped below `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split `text` into chunks. Whitespace-only input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        if text.trim().is_empty() {
            return out;
        }
        self.split_at_level(text, 0, &mut out);
        out
    }

    fn split_at_level(&self, text: &str, level: usize, out: &mut Vec<String>) {
        let Some((offset, sep)) = SEPARATORS[level..]
            .iter()
            .enumerate()
            .find(|(_, sep)| text.contains(**sep))
        else {
            self.hard_split(text, out);
            return;
        };
        let next_level = level + offset + 1;

        let mut fitting: Vec<&str> = Vec::new();
        for piece in text.split(sep) {
            if piece.trim().is_empty() {
                continue;
            }
            if char_len(piece) <= self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                self.merge(&fitting, sep, out);
                fitting.clear();
            }
            self.split_at_level(piece, next_level, out);
        }
        if !fitting.is_empty() {
            self.merge(&fitting, sep, out);
        }
    }

    fn merge(&self, pieces: &[&str], sep: &str, out: &mut Vec<String>) {
        let sep_len = char_len(sep);
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joined = if window.is_empty() { 0 } else { sep_len };

            if total + joined + len > self.chunk_size && !window.is_empty() {
                push_chunk(&window, sep, out);
                // Keep a tail no longer than the overlap that still leaves
                // room for the incoming piece.
                while !window.is_empty()
                    && (total > self.chunk_overlap || total + sep_len + len > self.chunk_size)
                {
                    if let Some(front) = window.pop_front() {
                        total -= char_len(front);
                        if !window.is_empty() {
                            total -= sep_len;
                        }
                    }
                }
            }

            if !window.is_empty() {
                total += sep_len;
            }
            total += len;
            window.push_back(piece);
        }

        if !window.is_empty() {
            push_chunk(&window, sep, out);
        }
    }

    fn hard_split(&self, text: &str, out: &mut Vec<String>) {
        let chars: Vec<char> = text.chars().collect();
        let step = self.chunk_size - self.chunk_overlap;
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                out.push(piece.to_string());
            }
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }
}

fn push_chunk(window: &VecDeque<&str>, sep: &str, out: &mut Vec<String>) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(sep);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
