use std::borrow::Cow;

/// Strip control characters from text taken out of feed payloads.
///
/// Tab, newline and carriage return are kept. Returns `Cow::Borrowed` when the
/// input is already clean, which is the common case.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|c| !is_stripped(*c)).collect())
}

fn is_stripped(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r')
}

/// Normalize a short text field (title, author, keyword) for storage.
///
/// Control characters are removed, runs of whitespace collapse to one space
/// and the result is trimmed. Blank input yields `None` so that optional
/// columns stay NULL instead of holding empty strings.
///
/// ```
/// use feedcluster::util::clean_text;
///
/// assert_eq!(clean_text("  Hello\n\tWorld \u{7}").as_deref(), Some("Hello World"));
/// assert_eq!(clean_text(" \n "), None);
/// ```
pub fn clean_text(s: &str) -> Option<String> {
    let stripped = strip_control_chars(s);
    let joined = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}
