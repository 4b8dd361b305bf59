//! Discord webhook channel — one embed per POST.
//!
//! The webhook URL carries its own token, so nothing here needs credentials
//! beyond the destination itself. Errors never include the URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use crate::error::ChannelError;
use crate::pipeline::types::{ChatChannel, Notification};

/// Characters of an error response body kept for diagnostics.
const ERROR_BODY_CHARS: usize = 200;

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    embeds: [Embed<'a>; 1],
    allowed_mentions: AllowedMentions,
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<EmbedField<'a>>,
    footer: EmbedFooter<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedField<'a> {
    name: &'a str,
    value: &'a str,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct EmbedFooter<'a> {
    text: &'a str,
}

/// Empty `parse` list: subjects like "@everyone" must not ping anyone.
#[derive(Debug, Serialize)]
struct AllowedMentions {
    parse: [&'static str; 0],
}

impl<'a> WebhookPayload<'a> {
    fn from_notification(n: &'a Notification) -> Self {
        Self {
            embeds: [Embed {
                title: &n.title,
                description: n.description.as_deref(),
                color: n.color,
                fields: n
                    .fields
                    .iter()
                    .map(|f| EmbedField {
                        name: &f.name,
                        value: &f.value,
                        inline: false,
                    })
                    .collect(),
                footer: EmbedFooter { text: &n.footer },
                timestamp: n.timestamp.map(|t| t.to_rfc3339()),
            }],
            allowed_mentions: AllowedMentions { parse: [] },
        }
    }
}

// ── Channel ─────────────────────────────────────────────────────────

pub struct DiscordWebhook {
    client: reqwest::Client,
}

impl DiscordWebhook {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for DiscordWebhook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatChannel for DiscordWebhook {
    fn name(&self) -> &str {
        "discord"
    }

    async fn post(&self, notification: &Notification) -> Result<(), ChannelError> {
        let payload = WebhookPayload::from_notification(notification);

        let resp = self
            .client
            .post(notification.destination.as_url().clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.without_url().to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.unwrap_or_default();

        tracing::debug!(
            status = status.as_u16(),
            destination = %notification.destination,
            "Webhook post rejected"
        );
        Err(classify_response(status, retry_after.as_deref(), &body))
    }
}

/// Map a non-success webhook response to a [`ChannelError`].
pub fn classify_response(status: StatusCode, retry_after: Option<&str>, body: &str) -> ChannelError {
    let code = status.as_u16();
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChannelError::RateLimited {
            retry_after: retry_after
                .and_then(parse_seconds)
                .or_else(|| body_retry_after(body)),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            ChannelError::Unauthorized { status: code }
        }
        s if s.is_server_error() => ChannelError::Server {
            status: code,
            body: clip(body),
        },
        _ => ChannelError::Rejected {
            status: code,
            body: clip(body),
        },
    }
}

/// Seconds, possibly fractional, as sent in `Retry-After` or `retry_after`.
fn parse_seconds(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

fn body_retry_after(body: &str) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let secs = value.get("retry_after")?.as_f64()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

fn clip(body: &str) -> String {
    body.trim().chars().take(ERROR_BODY_CHARS).collect()
}
