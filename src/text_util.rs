use std::collections::BTreeSet;

/// Rough conversion used to turn a token budget into a character budget.
pub const CHARS_PER_TOKEN: usize = 4;

/// Maximum number of characters shown in a draft preview.
pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 400;

/// Lowercased alphanumeric words of `text`, deduplicated.
pub fn word_set(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity of two word sets, in `[0, 1]`.
///
/// Two empty sets are considered identical.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}

/// Truncate to at most `max_chars` characters, never splitting a code point.
/// Appends `...` when anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Substitute `{section}` and `{requirement}` in a query template.
pub fn render_template(template: &str, section: &str, requirement: &str) -> String {
    template
        .replace("{section}", section)
        .replace("{requirement}", requirement)
}
