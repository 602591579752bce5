//! Overlapping fixed-window text chunker.
//!
//! Text is first normalized (control characters stripped, whitespace runs
//! collapsed), then windowed greedily into segments of `chunk_size`
//! characters. A window whose right edge falls inside the text is snapped
//! back to the nearest sentence terminator or line break within `lookback`
//! characters, provided the snap point lies past the window's midpoint.
//! Consecutive windows share `overlap` characters.
//!
//! Offsets are character offsets into the normalized text and every chunk's
//! text is exactly `normalized[start_offset..end_offset]`, so chunks can be
//! reassembled by dropping each chunk's leading overlap.

use crate::config::ChunkingConfig;
use crate::models::{chunk_id, Chunk};

/// Characters a window may be snapped back to (the cut lands after them).
const BREAK_CHARS: &[char] = &['.', '!', '?', '\n', '。', '！', '？'];

/// Collapse whitespace and strip control characters.
///
/// A whitespace run containing a line break becomes a single `\n`; any other
/// run becomes a single space. The result has no leading or trailing
/// whitespace.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending: Option<char> = None;

    for c in text.chars() {
        if c == '\n' || c == '\r' {
            pending = Some('\n');
        } else if c.is_whitespace() {
            if pending.is_none() {
                pending = Some(' ');
            }
        } else if c.is_control() {
            continue;
        } else {
            if let Some(ws) = pending.take() {
                if !out.is_empty() {
                    out.push(ws);
                }
            }
            out.push(c);
        }
    }
    out
}

/// A window over the normalized text, as character offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Compute chunk windows over `chars`.
///
/// Start offsets strictly increase, so the loop always terminates.
pub fn window_spans(chars: &[char], config: &ChunkingConfig) -> Vec<Span> {
    let len = chars.len();
    let size = config.chunk_size.max(1);
    let overlap = config.overlap.min(size - 1);
    let mut spans = Vec::new();
    let mut start = 0usize;

    while start < len {
        let raw_end = (start + size).min(len);
        let end = if raw_end < len {
            snap_to_break(chars, start, raw_end, config.lookback)
        } else {
            raw_end
        };

        if chars[start..end].iter().any(|c| !c.is_whitespace()) {
            spans.push(Span { start, end });
        }

        if end >= len {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    spans
}

/// Move `raw_end` back to just after a break character found within
/// `lookback` characters, if that point lies past the window midpoint.
fn snap_to_break(chars: &[char], start: usize, raw_end: usize, lookback: usize) -> usize {
    let midpoint = start + (raw_end - start) / 2;
    let floor = raw_end.saturating_sub(lookback).max(start);

    let mut i = raw_end;
    while i > floor {
        if BREAK_CHARS.contains(&chars[i - 1]) {
            return if i > midpoint { i } else { raw_end };
        }
        i -= 1;
    }
    raw_end
}

/// Normalize `text` and split it into chunks owned by `file_id`.
///
/// Returns the normalized text alongside the chunks so callers can verify
/// offsets against it. Ordinals are contiguous from 0.
pub fn chunk_document(
    file_id: &str,
    file_name: &str,
    text: &str,
    config: &ChunkingConfig,
) -> (String, Vec<Chunk>) {
    let normalized = normalize_text(text);
    let chars: Vec<char> = normalized.chars().collect();

    let chunks = window_spans(&chars, config)
        .into_iter()
        .enumerate()
        .map(|(i, span)| Chunk {
            chunk_id: chunk_id(file_id, i as i64),
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            chunk_index: i as i64,
            text: chars[span.start..span.end].iter().collect(),
            start_offset: span.start,
            end_offset: span.end,
        })
        .collect();

    (normalized, chunks)
}

/// Rebuild the normalized text from ordered chunks by dropping each chunk's
/// overlap with its predecessor.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start_offset);
        out.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.end_offset);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(size: usize, overlap: usize, lookback: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: size,
            overlap,
            lookback,
        }
    }

    fn sample_text() -> String {
        (0..60)
            .map(|i| format!("Sentence number {} talks about fresh produce and delivery.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn normalize_collapses_whitespace_and_controls() {
        let raw = "  Fresh\t\tmilk \u{0007}daily.\r\n\r\n\n  Eggs   too  ";
        assert_eq!(normalize_text(raw), "Fresh milk daily.\nEggs too");
    }

    #[test]
    fn empty_and_blank_text_yield_no_chunks() {
        let (_, chunks) = chunk_document("f", "f.txt", "", &ChunkingConfig::default());
        assert!(chunks.is_empty());
        let (_, chunks) = chunk_document("f", "f.txt", " \n\t ", &ChunkingConfig::default());
        assert!(chunks.is_empty());
    }

    #[test]
    fn short_text_is_single_chunk() {
        let (norm, chunks) = chunk_document("f", "f.txt", "Hello, grocer!", &ChunkingConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, norm);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, norm.chars().count());
        assert_eq!(chunks[0].chunk_id, "f_chunk_0");
    }

    #[test]
    fn ordinals_contiguous_and_offsets_consistent() {
        let (norm, chunks) = chunk_document("doc", "doc.txt", &sample_text(), &ChunkingConfig::default());
        let chars: Vec<char> = norm.chars().collect();
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            let slice: String = chars[c.start_offset..c.end_offset].iter().collect();
            assert_eq!(slice, c.text);
        }
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset > pair[0].start_offset);
            assert!(pair[1].end_offset >= pair[0].end_offset);
            let overlap = pair[0].end_offset.saturating_sub(pair[1].start_offset);
            assert!(overlap <= 50);
        }
    }

    #[test]
    fn reassembly_recovers_normalized_text() {
        let (norm, chunks) = chunk_document("doc", "doc.txt", &sample_text(), &ChunkingConfig::default());
        assert_eq!(reassemble(&chunks), norm);

        let (norm, chunks) = chunk_document("doc", "doc.txt", &sample_text(), &cfg(37, 9, 12));
        assert_eq!(reassemble(&chunks), norm);
    }

    #[test]
    fn snaps_to_sentence_end_past_midpoint() {
        let config = cfg(500, 50, 100);
        let (_, chunks) = chunk_document("doc", "doc.txt", &sample_text(), &config);
        let first = &chunks[0];
        assert!(first.text.ends_with('.'), "got: {:?}", first.text);
        assert!(first.end_offset > 250 && first.end_offset <= 500);
    }

    #[test]
    fn keeps_raw_cut_when_break_is_before_midpoint() {
        // Only break is at position 3, well before the midpoint of a 20-char window.
        let text = format!("Hi. {}", "x".repeat(60));
        let config = cfg(20, 5, 100);
        let (_, chunks) = chunk_document("doc", "doc.txt", &text, &config);
        assert_eq!(chunks[0].end_offset, 20);
    }

    #[test]
    fn step_count_bounded_without_breaks() {
        let text = "a".repeat(1234);
        let config = cfg(100, 20, 30);
        let (_, chunks) = chunk_document("doc", "doc.txt", &text, &config);
        let bound = (1234 + (100 - 20) - 1) / (100 - 20);
        assert!(chunks.len() <= bound, "{} > {}", chunks.len(), bound);
        assert_eq!(chunks.last().unwrap().end_offset, 1234);
    }

    #[test]
    fn terminates_with_degenerate_overlap() {
        // overlap >= size is clamped so start still advances.
        let spans = window_spans(&"abcdefghij".chars().collect::<Vec<_>>(), &cfg(3, 10, 0));
        assert!(!spans.is_empty());
        for pair in spans.windows(2) {
            assert!(pair[1].start > pair[0].start);
        }
        assert_eq!(spans.last().unwrap().end, 10);
    }

    #[test]
    fn twelve_hundred_chars_yield_three_chunks() {
        let text: String = "abcdefghij".repeat(120);
        let (_, chunks) = chunk_document("doc", "doc.txt", &text, &ChunkingConfig::default());
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn deterministic() {
        let a = chunk_document("doc", "doc.txt", &sample_text(), &ChunkingConfig::default()).1;
        let b = chunk_document("doc", "doc.txt", &sample_text(), &ChunkingConfig::default()).1;
        assert_eq!(a, b);
    }
}
