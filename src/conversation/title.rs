/// Longest auto-derived title, in characters, including the ellipsis
pub const TITLE_MAX_CHARS: usize = 50;

const ELLIPSIS: &str = "...";

fn is_sentence_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Derive a conversation title from the first user message: the text up to
/// the first sentence terminator, shortened to 47 characters plus an
/// ellipsis when it does not fit in 50.
pub fn derive_title(content: &str) -> Option<String> {
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return None;
    }

    let sentence = match normalized.find(is_sentence_terminator) {
        Some(end) if !normalized[..end].trim().is_empty() => normalized[..end].trim_end(),
        _ => normalized.as_str(),
    };

    if sentence.chars().count() <= TITLE_MAX_CHARS {
        return Some(sentence.to_string());
    }

    let mut title: String = sentence
        .chars()
        .take(TITLE_MAX_CHARS - ELLIPSIS.len())
        .collect();
    title.push_str(ELLIPSIS);
    Some(title)
}
