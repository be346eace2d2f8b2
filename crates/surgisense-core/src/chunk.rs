//! Fixed-window overlapping text chunker.
//!
//! Splits extracted document text into [`Chunk`]s of `size` characters,
//! each overlapping its predecessor by `overlap` characters. Lengths and
//! offsets are counted in `char`s, so a window never splits a UTF-8
//! sequence.
//!
//! # Algorithm
//!
//! 1. Start at offset 0.
//! 2. Emit `text[start..start + size]` (clamped to the end of the text).
//! 3. Stop if that window reached the end of the text.
//! 4. Otherwise advance `start` by `size - overlap` and repeat.
//!
//! Step 3 guarantees no window is fully contained in its predecessor, so
//! for a text of `L > overlap` characters exactly
//! `ceil((L - overlap) / (size - overlap))` chunks are produced.
//!
//! # Example
//!
//! ```rust
//! use surgisense_core::chunk::{chunk_text, ChunkingParams};
//!
//! let params = ChunkingParams::new(10, 2).unwrap();
//! let chunks = chunk_text("abcdefghijklmnop", &params);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].text, "abcdefghij");
//! assert_eq!(chunks[1].text, "ijklmnop");
//! ```

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::ConfigurationError;

/// Default window length, in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 800;
/// Default overlap between consecutive windows, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// A contiguous window of the ingested document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    /// Position in the chunk sequence, starting at 0.
    pub index: usize,
    /// Start offset in the source text, in chars (inclusive).
    pub start: usize,
    /// End offset in the source text, in chars (exclusive).
    pub end: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// Validated window parameters.
///
/// Construction fails unless `size > 0` and `overlap < size`; with any
/// other combination the cursor would never advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    size: usize,
    overlap: usize,
}

impl ChunkingParams {
    pub fn new(size: usize, overlap: usize) -> Result<Self, ConfigurationError> {
        if size == 0 || overlap >= size {
            return Err(ConfigurationError::InvalidChunking { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance the cursor advances between windows (`size - overlap`).
    pub fn step(&self) -> usize {
        self.size - self.overlap
    }
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Split `text` into overlapping windows.
///
/// Returns an empty vector for empty text; callers treat that as
/// "nothing to index".
pub fn chunk_text(text: &str, params: &ChunkingParams) -> Vec<Chunk> {
    // Byte offset of every char boundary, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = bounds.len() - 1;

    let mut chunks = Vec::new();
    if char_len == 0 {
        return chunks;
    }

    let mut start = 0usize;
    loop {
        let end = (start + params.size).min(char_len);
        chunks.push(make_chunk(
            chunks.len(),
            start,
            end,
            &text[bounds[start]..bounds[end]],
        ));
        if end >= char_len {
            break;
        }
        start += params.step();
    }

    chunks
}

/// Hex-encoded SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(index: usize, start: usize, end: usize, text: &str) -> Chunk {
    Chunk {
        index,
        start,
        end,
        text: text.to_string(),
        hash: content_hash(text),
    }
}
