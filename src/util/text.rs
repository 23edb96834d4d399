//! Char-boundary-safe text helpers.

/// Length in Unicode scalar values.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// The first `max_chars` characters of `text`.
pub fn take_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Rough token estimate: four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    char_len(text).div_ceil(4)
}
