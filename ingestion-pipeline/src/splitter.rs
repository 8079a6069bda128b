//! Recursive length-bounded text splitter used by [`crate::pdf::ingest_pdf`].
//!
//! Tries to break on paragraph boundaries first, falling back to lines and
//! then word boundaries, targeting chunks of at most `chunk_size` characters
//! with at least `overlap` characters carried into the start of the next
//! chunk.

/// Splits `text` into chunks of at most `chunk_size` chars, each one
/// (except the first) overlapping the previous chunk's tail by at least
/// `overlap` chars where the source text is long enough to provide it.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= chunk_size {
        return vec![text.to_string()];
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());
        if end < chars.len() {
            end = break_point(&chars, start, end);
        }
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

/// Finds the best break point in `chars[start..end]`, preferring (in
/// order) a paragraph break (`\n\n`), a line break (`\n`), then a word
/// boundary (whitespace). Falls back to the hard `end` boundary if none of
/// those occur past the midpoint of the window.
fn break_point(chars: &[char], start: usize, end: usize) -> usize {
    let midpoint = start + (end - start) / 2;

    if let Some(at) = rfind_in(chars, midpoint, end, |w| w == ['\n', '\n']) {
        return at;
    }
    if let Some(at) = rfind_char(chars, midpoint, end, '\n') {
        return at;
    }
    if let Some(at) = rfind_char(chars, midpoint, end, ' ') {
        return at;
    }
    end
}

fn rfind_char(chars: &[char], from: usize, to: usize, needle: char) -> Option<usize> {
    (from..to).rev().find(|&i| chars[i] == needle).map(|i| i + 1)
}

fn rfind_in(chars: &[char], from: usize, to: usize, matches: impl Fn([char; 2]) -> bool) -> Option<usize> {
    if to < 1 {
        return None;
    }
    (from..to.saturating_sub(1))
        .rev()
        .find(|&i| matches([chars[i], chars[i + 1]]))
        .map(|i| i + 2)
}
