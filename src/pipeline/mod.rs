//! Classification-and-delivery pipeline.
//!
//! One run flows through:
//! 1. `fetcher::fetch()` — unprocessed messages from the mailbox
//! 2. `classifier::classify()` — keyword rules to destinations
//! 3. `notification::build_all()` — one notification per destination
//! 4. `Dispatcher::dispatch()` — bounded retry per notification
//!
//! `processor::Relay` drives the steps and records completed messages.

pub mod classifier;
pub mod dispatcher;
pub mod fetcher;
pub mod notification;
pub mod processor;
pub mod rules;
pub mod types;
