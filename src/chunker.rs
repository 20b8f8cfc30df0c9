//! Text chunking for the map-reduce path.
//!
//! Two modes:
//!
//! * **Semantic** (default): paragraphs are packed into chunks of roughly
//!   `chunk_size` characters. Each chunk after the first starts with a short
//!   overlap taken from the tail of its predecessor, cut at a sentence
//!   boundary when one lies in the back half of the overlap window.
//! * **Fixed**: a window of `chunk_size` characters slides over the text with
//!   stride `chunk_size - chunk_overlap` (at least 1).
//!
//! All sizes and offsets are in characters, not bytes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Separator placed between paragraphs inside a semantic chunk.
const PARAGRAPH_SEP: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Semantic,
    Fixed,
}

/// A bounded text segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub content: String,
    /// Length of `content` in characters.
    pub size: usize,
    pub kind: ChunkKind,
    /// Character offset of the window start (fixed mode only).
    pub start_offset: Option<usize>,
    /// Character offset one past the window end (fixed mode only).
    pub end_offset: Option<usize>,
    /// Number of leading characters repeated from the previous chunk.
    ///
    /// Redundant context only; `content` minus this prefix is the part the
    /// chunk is responsible for.
    pub overlap: usize,
}

impl Chunk {
    /// `content` without the prefix repeated from the previous chunk.
    pub fn own_content(&self) -> &str {
        match self.content.char_indices().nth(self.overlap) {
            Some((byte, _)) => &self.content[byte..],
            None if self.overlap == 0 => &self.content,
            None => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Semantic mode when true, fixed windows when false.
    pub preserve_structure: bool,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 200,
            preserve_structure: true,
        }
    }
}

/// Split `text` into an ordered chunk sequence.
///
/// The result is empty iff `text` is empty or whitespace-only.
pub fn chunk(text: &str, options: &ChunkOptions) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let size = options.chunk_size.max(1);
    if options.preserve_structure {
        // A seed as long as the chunk would carry every predecessor forward.
        semantic_chunks(text, size, options.chunk_overlap.min(size - 1))
    } else {
        fixed_chunks(text, size, options.chunk_overlap)
    }
}

/// Blank-line separated paragraphs of `text`, trimmed, empties dropped.
///
/// Semantic chunks reproduce exactly this sequence once their overlap
/// prefixes are removed.
pub fn paragraphs(text: &str) -> Vec<&str> {
    RE_PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn semantic_chunks(text: &str, size: usize, overlap: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    let mut current_overlap = 0usize;

    for paragraph in paragraphs(text) {
        let para_len = paragraph.chars().count();
        let sep_len = if current.is_empty() { 0 } else { 2 };

        if !current.is_empty() && current_len + sep_len + para_len > size {
            let closed = std::mem::take(&mut current);
            let seed = if overlap > 0 {
                overlap_tail(&closed, overlap)
            } else {
                String::new()
            };
            chunks.push(semantic_chunk(closed, current_len, current_overlap));

            if seed.is_empty() {
                current_overlap = 0;
                current_len = 0;
            } else {
                current_overlap = seed.chars().count() + 2;
                current_len = current_overlap;
                current.push_str(&seed);
                current.push_str(PARAGRAPH_SEP);
            }
            current.push_str(paragraph);
            current_len += para_len;
        } else {
            if !current.is_empty() {
                current.push_str(PARAGRAPH_SEP);
            }
            current.push_str(paragraph);
            current_len += sep_len + para_len;
        }
    }

    if !current.is_empty() {
        chunks.push(semantic_chunk(current, current_len, current_overlap));
    }
    chunks
}

fn semantic_chunk(content: String, size: usize, overlap: usize) -> Chunk {
    Chunk {
        content,
        size,
        kind: ChunkKind::Semantic,
        start_offset: None,
        end_offset: None,
        overlap,
    }
}

/// Tail of `text` used to seed the next semantic chunk.
///
/// The last `overlap` characters, cut after the last `.` when that full stop
/// lies past the midpoint of the window. A full stop ending the window does
/// not count, it would leave nothing to carry. Always trimmed.
fn overlap_tail(text: &str, overlap: usize) -> String {
    let chars: Vec<char> = text.trim_end().chars().collect();
    if chars.len() <= overlap {
        return text.trim().to_string();
    }
    let tail = &chars[chars.len() - overlap..];
    let cut = tail[..tail.len() - 1]
        .iter()
        .rposition(|&c| c == '.')
        .filter(|&pos| pos as f64 > overlap as f64 * 0.5);
    let kept = match cut {
        Some(pos) => &tail[pos + 1..],
        None => tail,
    };
    kept.iter().collect::<String>().trim().to_string()
}

fn fixed_chunks(text: &str, size: usize, overlap: usize) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let stride = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut prev_end = 0usize;

    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let content: String = chars[start..end].iter().collect();
        chunks.push(Chunk {
            size: end - start,
            content,
            kind: ChunkKind::Fixed,
            start_offset: Some(start),
            end_offset: Some(end),
            overlap: prev_end.saturating_sub(start),
        });
        if end == chars.len() {
            break;
        }
        prev_end = end;
        start += stride;
    }
    chunks
}
