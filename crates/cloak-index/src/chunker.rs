//! Recursive character splitting of source text into overlapping windows.
//!
//! The text is cut on the coarsest separator that occurs in it (blank line, then
//! newline, then space, then between characters). Pieces that still exceed the
//! window size are cut again with the next separator. Adjacent small pieces are
//! merged greedily into windows of at most `chunk_size` characters, and each new
//! window starts with up to `chunk_overlap` trailing characters of the previous
//! one. Separators stay attached to the start of the piece that follows them.

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::languages::{detect_language, extract_symbols, language_tag};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Window size and overlap, both counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkerConfig {
    /// # Errors
    ///
    /// Returns `InvalidArgument` unless `0 < chunk_size` and `chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(IndexError::InvalidArgument(
                "chunk_size must be positive".into(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(IndexError::InvalidArgument(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

/// One window of a source file, ready for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeChunk {
    pub source_path: String,
    pub language: String,
    pub text: String,
    pub symbols: Vec<String>,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// Split `source` into windows and annotate each with its language tag and
/// the symbols declared inside it.
///
/// `file_path` is stored verbatim and also drives language detection.
#[must_use]
pub fn chunk_file(source: &str, file_path: &str, config: &ChunkerConfig) -> Vec<CodeChunk> {
    let path = Path::new(file_path);
    let lang = detect_language(path);
    let language = language_tag(path);
    let windows = split_text(source, config);
    let total_chunks = windows.len();

    windows
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| CodeChunk {
            source_path: file_path.to_owned(),
            language: language.clone(),
            symbols: lang.map(|l| extract_symbols(&text, l)).unwrap_or_default(),
            text,
            chunk_index,
            total_chunks,
        })
        .collect()
}

/// Split `text` into trimmed, non-empty windows of at most `chunk_size` characters.
#[must_use]
pub fn split_text(text: &str, config: &ChunkerConfig) -> Vec<String> {
    split_recursive(text, &SEPARATORS, config)
}

fn split_recursive(text: &str, separators: &[&str], config: &ChunkerConfig) -> Vec<String> {
    let (separator, finer) = pick_separator(text, separators);

    let mut windows = Vec::new();
    let mut pending: Vec<&str> = Vec::new();
    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) < config.chunk_size {
            pending.push(piece);
            continue;
        }
        if !pending.is_empty() {
            windows.extend(merge_pieces(&pending, config));
            pending.clear();
        }
        if finer.is_empty() {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                windows.push(trimmed.to_owned());
            }
        } else {
            windows.extend(split_recursive(piece, finer, config));
        }
    }
    if !pending.is_empty() {
        windows.extend(merge_pieces(&pending, config));
    }
    windows
}

/// First separator present in `text`, plus the finer ones left to try.
fn pick_separator<'a>(text: &str, separators: &'a [&'a str]) -> (&'a str, &'a [&'a str]) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() {
            return ("", &[]);
        }
        if text.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    (separators.last().copied().unwrap_or(""), &[])
}

fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    pieces.push(&text[start..]);
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn merge_pieces(pieces: &[&str], config: &ChunkerConfig) -> Vec<String> {
    let size = config.chunk_size;
    let overlap = config.chunk_overlap;

    let mut windows = Vec::new();
    let mut current: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);
        if total + len > size && !current.is_empty() {
            if let Some(window) = join_trimmed(&current) {
                windows.push(window);
            }
            while total > overlap || (total + len > size && total > 0) {
                let Some((_, dropped)) = current.pop_front() else {
                    break;
                };
                total -= dropped;
            }
        }
        current.push_back((piece, len));
        total += len;
    }
    if let Some(window) = join_trimmed(&current) {
        windows.push(window);
    }
    windows
}

fn join_trimmed(pieces: &VecDeque<(&str, usize)>) -> Option<String> {
    let joined: String = pieces.iter().map(|(p, _)| *p).collect();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
