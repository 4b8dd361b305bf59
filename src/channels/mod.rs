//! Mailbox and chat-channel implementations.

pub mod discord;
pub mod email_types;
pub mod imap;

pub use discord::DiscordWebhook;
pub use imap::{ImapMailbox, MailboxConfig};
