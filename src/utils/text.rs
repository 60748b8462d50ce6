// Text processing utilities

/// String and text manipulation utilities
pub mod string {
    /// Keep the first `max_chars` characters, appending `...` when anything was cut
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
        match text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
            None => text.to_string(),
        }
    }

    /// Collapse runs of whitespace into single spaces
    pub fn normalize_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}
