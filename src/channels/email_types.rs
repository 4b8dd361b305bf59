//! Email helpers — address extraction, HTML stripping, body previews.

use std::sync::LazyLock;

use regex::Regex;

static ANGLE_ADDR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^<>]+)>").expect("valid address pattern"));

/// Upper bound on body text kept per message before notification truncation.
pub const SNIPPET_SOURCE_CHARS: usize = 1000;

/// Extract the bare address from a `From` value.
///
/// `"Name <user@host>"` → `"user@host"`; anything without angle brackets is
/// returned trimmed.
pub fn extract_email_address(from: &str) -> String {
    ANGLE_ADDR
        .captures(from)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| from.trim().to_string())
}

/// Split a `From` value into display name and address.
pub fn split_sender(from: &str) -> (Option<String>, String) {
    let address = extract_email_address(from);
    let name = from
        .find('<')
        .map(|pos| from[..pos].trim().trim_matches('"').trim().to_string())
        .filter(|n| !n.is_empty());
    (name, address)
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    collapse_whitespace(&result)
}

/// Collapse runs of whitespace (including newlines) into single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Single-line body preview, capped at [`SNIPPET_SOURCE_CHARS`].
pub fn make_snippet(body: &str) -> Option<String> {
    let collapsed: String = collapse_whitespace(body)
        .chars()
        .take(SNIPPET_SOURCE_CHARS)
        .collect();
    (!collapsed.is_empty()).then_some(collapsed)
}
