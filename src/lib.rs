//! Inbox relay — routes new mail to chat webhooks by keyword.

pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod store;
