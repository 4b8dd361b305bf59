//! Error types for the relay.

use std::time::Duration;

/// Top-level error type. Every variant aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Interrupted before the run completed")]
    Interrupted,
}

impl Error {
    /// Process exit code for a run aborted by this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Auth(_) => 3,
            Self::Fetch(_) => 4,
            Self::State(_) => 5,
            Self::Interrupted => 130,
        }
    }
}

/// Configuration-related errors. Raised before any I/O against the mailbox
/// or chat destinations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse rule document: {0}")]
    ParseError(String),

    #[error("Rule #{rule} has no keywords")]
    EmptyKeywords { rule: usize },

    #[error("Rule #{rule} contains a blank keyword")]
    BlankKeyword { rule: usize },

    #[error("Invalid destination for {target}: {reason}")]
    InvalidDestination { target: String, reason: String },

    #[error("Unknown color {value:?} for {target}")]
    UnknownColor { target: String, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Credential errors. Fatal: surfaced to the invoker with a non-zero exit.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Mailbox login rejected for {username}: {reason}")]
    Mailbox { username: String, reason: String },
}

/// Mailbox fetch errors. Fatal: nothing can be classified without a listing.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Mailbox protocol error: {0}")]
    Protocol(String),

    #[error("Mailbox task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single post attempt to a chat destination failed.
///
/// Scoped to one (message, destination) pair; never aborts the run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Destination rejected credentials ({status})")]
    Unauthorized { status: u16 },

    #[error("Destination rejected payload ({status}): {body}")]
    Rejected { status: u16, body: String },
}

impl ChannelError {
    /// Whether a retry may succeed (rate limit, timeout, transport, 5xx).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Transport(_) | Self::Server { .. }
        )
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Processed-state persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported state version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
