//! support-desk - Support ticket lifecycle manager for chat platforms
//!
//! Requesters open private ticket channels, staff claim and close them, and
//! closed tickets are deleted after a grace period. The crate provides:
//! - A durable ticket registry backed by an append-only log
//! - A per-event acknowledgment protocol with deferred responses
//! - Per-requester creation cooldowns
//! - Passive access grants for users mentioned inside a ticket
//! - Plain-text transcripts of ticket channels

// Allow missing error documentation for internal implementations
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::single_match_else)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::map_unwrap_or)]

//! # Concurrency
//!
//! Every inbound event runs in its own task. The registry and the cooldown
//! guard serialize their own state; per-requester and per-ticket async locks
//! keep creation and membership changes single-flight. Platform calls are
//! suspension points, so ticket state is re-read after each one.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use support_desk::config::Config;
//! use support_desk::events::EventBus;
//! use support_desk::lifecycle::TicketLifecycle;
//! use support_desk::platform::LocalPlatform;
//!
//! let config = Config::load(None)?;
//! let desk = TicketLifecycle::open(&config, Arc::new(LocalPlatform::new()), EventBus::new())?;
//! desk.startup().await?;
//!
//! let permit = desk.admit_creation(requester)?;
//! let ticket = desk.create(permit).await?;
//! ```

pub mod access;
pub mod ack;
pub mod cli;
pub mod config;
pub mod cooldown;
pub mod core;
pub mod error;
pub mod events;
pub mod handlers;
pub mod lifecycle;
pub mod platform;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod transcript;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use error::{DeskError, Result};
