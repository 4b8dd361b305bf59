//! Notification builder — renders one message for one route.
//!
//! Pure and total: long text is truncated at a fixed character boundary,
//! never rejected. Limits follow the Discord embed limits.

use crate::pipeline::types::{
    CandidateMessage, MatchResult, Notification, NotificationField, Route,
};

/// Maximum embed title length.
pub const MAX_TITLE_CHARS: usize = 256;

/// Body preview length.
pub const MAX_DESCRIPTION_CHARS: usize = 300;

/// Maximum embed field value length.
pub const MAX_FIELD_CHARS: usize = 1024;

const TITLE_PREFIX: &str = "📧 ";
const NO_SUBJECT: &str = "(No Subject)";
const FOOTER_TEXT: &str = "inbox-relay";
const ELLIPSIS: char = '…';

/// Build the notification for one (message, route) pair.
pub fn build(message: &CandidateMessage, route: &Route) -> Notification {
    let subject = message.subject.trim();
    let subject = if subject.is_empty() { NO_SUBJECT } else { subject };
    let title = truncate_chars(&format!("{TITLE_PREFIX}{subject}"), MAX_TITLE_CHARS);

    let description = message
        .snippet
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| truncate_chars(s, MAX_DESCRIPTION_CHARS));

    let mut fields = vec![NotificationField {
        name: "From".into(),
        value: truncate_chars(&message.sender_display(), MAX_FIELD_CHARS),
    }];
    if let Some(date) = message.date.as_deref().filter(|d| !d.trim().is_empty()) {
        fields.push(NotificationField {
            name: "Received".into(),
            value: truncate_chars(date.trim(), MAX_FIELD_CHARS),
        });
    }

    Notification {
        message_id: message.id.clone(),
        destination: route.destination.clone(),
        title,
        description,
        color: route.color.value(),
        fields,
        footer: FOOTER_TEXT.into(),
        timestamp: message.received_at,
    }
}

/// One notification per route, in route order.
pub fn build_all(message: &CandidateMessage, matched: &MatchResult) -> Vec<Notification> {
    matched.routes.iter().map(|route| build(message, route)).collect()
}

/// Cut `text` to at most `max_chars` characters, ending in `…` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push(ELLIPSIS);
    out
}
