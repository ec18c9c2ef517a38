//! Fixed-size sliding-window chunker with sentence-boundary snapping
//!
//! Offsets are in chars, not bytes, so chunk boundaries never split a
//! multi-byte code point.

use serde::{Deserialize, Serialize};

/// Smallest window the chunker will use
pub const MIN_CHUNK_SIZE: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
}

/// Split `text` into overlapping windows of at most `chunk_size` chars.
///
/// A window that stops short of the end of the text is pulled back to just
/// after the last sentence end found within its final `snap_window` chars.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize, snap_window: usize) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    if total == 0 {
        return Vec::new();
    }

    let size = chunk_size.max(MIN_CHUNK_SIZE);
    let overlap = overlap.min(size - 1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total {
        let mut end = (start + size).min(total);
        if end < total
            && let Some(snapped) = snap_to_sentence(&chars, start, end, snap_window)
        {
            end = snapped;
        }

        if let Some(chunk) = trimmed_chunk(&chars, start, end, chunks.len()) {
            chunks.push(chunk);
        }

        if end >= total {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

/// Position just past the last sentence terminator in `[end - window, end)`
fn snap_to_sentence(chars: &[char], start: usize, end: usize, window: usize) -> Option<usize> {
    let floor = end.saturating_sub(window).max(start);
    (floor..end).rev().find_map(|i| {
        let c = chars[i];
        let boundary = c == '\n'
            || (matches!(c, '.' | '!' | '?')
                && chars.get(i + 1).is_some_and(|next| next.is_whitespace()));
        boundary.then_some(i + 1)
    })
}

fn trimmed_chunk(chars: &[char], start: usize, end: usize, index: usize) -> Option<Chunk> {
    let window = &chars[start..end];
    let lead = window.iter().take_while(|c| c.is_whitespace()).count();
    if lead == window.len() {
        return None;
    }
    let trail = window.iter().rev().take_while(|c| c.is_whitespace()).count();
    let char_start = start + lead;
    let char_end = end - trail;
    Some(Chunk {
        index,
        text: chars[char_start..char_end].iter().collect(),
        char_start,
        char_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_blank_input_yield_nothing() {
        assert!(chunk_text("", 100, 10, 20).is_empty());
        assert!(chunk_text("   \n\n  ", 100, 10, 20).is_empty());
    }

    #[test]
    fn short_text_is_one_trimmed_chunk() {
        let chunks = chunk_text("  The Magna Carta was sealed in 1215.  ", 1000, 200, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "The Magna Carta was sealed in 1215.");
        assert_eq!(chunks[0].char_start, 2);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn window_snaps_back_to_sentence_end() {
        let text = "One two three four five six seven eight. Nine ten eleven twelve thirteen fourteen.";
        let chunks = chunk_text(text, 50, 10, 20);
        assert_eq!(chunks[0].text, "One two three four five six seven eight.");
        assert_eq!(chunks[0].char_end, 40);
        assert_eq!(chunks.last().unwrap().char_end, text.chars().count());
        assert!(chunks.last().unwrap().text.ends_with('.'));
    }

    #[test]
    fn windows_overlap_without_sentence_ends() {
        let text = "abcdefghij".repeat(12);
        let chunks = chunk_text(&text, 50, 10, 20);
        assert_eq!(chunks[0].char_end, 50);
        assert_eq!(chunks[1].char_start, 40);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 50));
        let indexes: Vec<_> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indexes, (0..chunks.len()).collect::<Vec<_>>());
        assert_eq!(chunks.last().unwrap().char_end, 120);
    }

    #[test]
    fn size_floor_and_overlap_clamp_still_advance() {
        let text = "x".repeat(200);
        let chunks = chunk_text(&text, 1, 500, 0);
        assert!(chunks.iter().all(|c| c.text.chars().count() == 50));
        assert!(chunks.windows(2).all(|w| w[1].char_start > w[0].char_start));
    }

    #[test]
    fn multibyte_text_is_split_on_chars() {
        let text = "é".repeat(120);
        let chunks = chunk_text(&text, 50, 0, 10);
        let lens: Vec<_> = chunks.iter().map(|c| c.text.chars().count()).collect();
        assert_eq!(lens, vec![50, 50, 20]);
    }
}
