//! Line-window chunking used when no grammar is loaded for a language, or
//! when AST parsing fails, or as the final fallback if the AST walk emits
//! nothing at all (§4.2 step 1 and step 5's "no chunks emitted" case).

use crate::config::ChunkerConfig;
use crate::hash::content_digest;

use super::{Chunk, ChunkKind, ChunkMetadata, ChunkReference};

/// Byte offset where each 1-indexed line begins, plus a trailing sentinel at
/// `source.len()` so a line's end can always be looked up by index.
fn line_starts(source: &[u8]) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, &b) in source.iter().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// Emit `[start, start+fallbackLineSize)` windows stepping by
/// `fallbackLineSize - fallbackOverlap`, each tagged `kind=block,
/// fallback=true`, trimmed and dropped if below `minChunkSize`.
pub fn line_window(
    source: &[u8],
    language_id: &str,
    relative_path: &str,
    config: &ChunkerConfig,
) -> Vec<Chunk> {
    if source.is_empty() {
        return Vec::new();
    }
    let starts = line_starts(source);
    let total_lines = starts.len() - 1 + if source.last() == Some(&b'\n') { 0 } else { 1 };
    let total_lines = total_lines.max(1);

    let step = config
        .fallback_line_size
        .saturating_sub(config.fallback_overlap)
        .max(1);

    let mut chunks = Vec::new();
    let mut line_start = 1usize;
    while line_start <= total_lines {
        let line_end = (line_start + config.fallback_line_size - 1).min(total_lines);

        let char_start = line_byte_offset(&starts, source.len(), line_start);
        let char_end = line_byte_offset(&starts, source.len(), line_end + 1);

        let raw = &source[char_start..char_end];
        let trimmed_len = trim_len(raw);
        if trimmed_len >= config.min_chunk_size {
            chunks.push(Chunk {
                hash: content_digest(raw),
                kind: ChunkKind::Block,
                name: None,
                language_id: language_id.to_string(),
                reference: ChunkReference {
                    relative_path: relative_path.to_string(),
                    line_start,
                    line_end,
                    char_start,
                    char_end,
                },
                char_count: (char_end - char_start) as u64,
                metadata: ChunkMetadata {
                    fallback: Some(true),
                    ..ChunkMetadata::default()
                },
            });
        }

        if line_end >= total_lines {
            break;
        }
        line_start += step;
    }
    chunks
}

fn line_byte_offset(starts: &[usize], source_len: usize, one_indexed_line: usize) -> usize {
    let idx = one_indexed_line.saturating_sub(1);
    starts.get(idx).copied().unwrap_or(source_len)
}

fn trim_len(bytes: &[u8]) -> usize {
    std::str::from_utf8(bytes)
        .map(|s| s.trim().len())
        .unwrap_or(bytes.len())
}
