//! Shared types for the classification-and-delivery pipeline.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, FetchError};
use crate::pipeline::rules::ColorSpec;
use crate::store::ProcessedSet;

// ── Identifiers ─────────────────────────────────────────────────────

/// Opaque, stable mailbox message identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A validated chat-channel endpoint (webhook URL).
///
/// Webhook URLs embed their credential in the path, so both `Display` and
/// `Debug` print the redacted form. Use [`Destination::as_url`] to reach the
/// real endpoint.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Destination(Url);

impl Destination {
    /// Parse and validate an endpoint reference: absolute http(s) URL with a host.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let url = Url::parse(raw.trim()).map_err(|e| e.to_string())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("unsupported scheme {:?}", url.scheme()));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err("missing host".into());
        }
        Ok(Self(url))
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// Endpoint with its last path segment masked and the query dropped.
    pub fn redacted(&self) -> String {
        let url = &self.0;
        let host = url.host_str().unwrap_or_default();
        let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
        let mut segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        if let Some(last) = segments.last_mut() {
            *last = "***";
        }
        format!("{}://{host}{port}/{}", url.scheme(), segments.join("/"))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Destination").field(&self.redacted()).finish()
    }
}

// ── Candidate message ───────────────────────────────────────────────

/// A mailbox item that has not yet been fully delivered.
///
/// Immutable once read. Only `id` is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMessage {
    pub id: MessageId,
    /// Subject line; empty when the header is missing.
    pub subject: String,
    /// Bare sender address (`user@host`), used for classification.
    pub sender: String,
    /// Sender display name from the `From` header, if any.
    pub sender_name: Option<String>,
    /// Plain-text body preview.
    pub snippet: Option<String>,
    /// `Date` header as sent.
    pub date: Option<String>,
    /// Parsed `Date` header.
    pub received_at: Option<DateTime<Utc>>,
}

impl CandidateMessage {
    pub fn new(id: impl Into<String>, subject: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(id),
            subject: subject.into(),
            sender: sender.into(),
            sender_name: None,
            snippet: None,
            date: None,
            received_at: None,
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>, received_at: Option<DateTime<Utc>>) -> Self {
        self.date = Some(date.into());
        self.received_at = received_at;
        self
    }

    /// `Name <addr>` when a display name is known, otherwise the address.
    pub fn sender_display(&self) -> String {
        match self.sender_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => format!("{name} <{}>", self.sender),
            _ => self.sender.clone(),
        }
    }
}

// ── Classification result ───────────────────────────────────────────

/// One destination a message routes to, with the color it is shown in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: Destination,
    pub color: ColorSpec,
}

/// Ordered, duplicate-free routes for one message.
///
/// Never empty: with no rule match it holds exactly the default route and
/// `fallback` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub routes: Vec<Route>,
    pub fallback: bool,
}

impl MatchResult {
    pub fn destinations(&self) -> impl Iterator<Item = &Destination> {
        self.routes.iter().map(|r| &r.destination)
    }
}

// ── Notification ────────────────────────────────────────────────────

/// Labeled value rendered under the notification body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationField {
    pub name: String,
    pub value: String,
}

/// The unit handed to the dispatcher: one per (message, destination) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message_id: MessageId,
    pub destination: Destination,
    pub title: String,
    pub description: Option<String>,
    /// 24-bit RGB value.
    pub color: u32,
    pub fields: Vec<NotificationField>,
    pub footer: String,
    pub timestamp: Option<DateTime<Utc>>,
}

// ── Delivery outcome ────────────────────────────────────────────────

/// Terminal state of one notification after bounded retry.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Failed { error: ChannelError, attempts: u32 },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts } | Self::Failed { attempts, .. } => *attempts,
        }
    }
}

// ── Collaborator traits ─────────────────────────────────────────────

/// Read side of the mailbox. Authentication happens behind this trait.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Mailbox name for logging.
    fn name(&self) -> &str;

    /// List candidate messages, skipping any id contained in `exclude`.
    ///
    /// Order must be stable within one call.
    async fn list_unprocessed(
        &self,
        exclude: &ProcessedSet,
    ) -> crate::error::Result<Vec<CandidateMessage>>;

    /// Flag fully delivered messages as read in the mailbox itself.
    async fn label_as_read(&self, _ids: &[MessageId]) -> Result<(), FetchError> {
        Ok(())
    }
}

/// Write side of a chat channel: one post per call, no retries.
#[async_trait]
pub trait ChatChannel: Send + Sync {
    /// Channel name for logging.
    fn name(&self) -> &str;

    /// Post a notification to its destination.
    async fn post(&self, notification: &Notification) -> Result<(), ChannelError>;
}
