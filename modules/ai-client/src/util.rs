/// Strip a markdown code fence wrapping a model response, including an
/// optional language tag on the opening fence.
pub fn strip_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line ("json", "markdown", ...)
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

/// Clip a string to at most `max_bytes` bytes without splitting a
/// character. Prompt contexts are byte-budgeted, not char-budgeted.
pub fn clip_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
