//! Error types for support-desk
//!
//! Every failure a handler can hit falls into one of a handful of kinds.
//! The kind decides how the failure is surfaced: user-facing kinds carry a
//! specific private message, internal kinds are logged and reported with a
//! generic message for the action that failed.

use crate::core::{Capability, TicketStatus};
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, DeskError>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum DeskError {
    /// Malformed or missing input
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// The actor lacks a required capability
    #[error("permission denied: {0}")]
    Permission(#[from] PermissionDenied),

    /// The operation is not valid for the ticket's current state
    #[error("state conflict: {0}")]
    StateConflict(#[from] StateConflict),

    /// An external platform call failed
    #[error("platform call failed: {0}")]
    Platform(#[from] PlatformError),

    /// The acknowledgment protocol was misused
    #[error("response protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Local persistence failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl DeskError {
    /// Whether the error is caused by the user's input or the ticket's state
    /// and should be reported with its specific message.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Permission(_) | Self::StateConflict(_)
        )
    }

    /// Message shown to the user who triggered `action`
    #[must_use]
    pub fn user_message(&self, action: &str) -> String {
        match self {
            Self::Validation(e) => e.user_message(),
            Self::Permission(e) => e.user_message(),
            Self::StateConflict(e) => e.user_message(),
            _ => format!("An error occurred while {action}."),
        }
    }
}

/// Input rejected before any state was touched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("this action can only be used in ticket channels")]
    NotATicketChannel,

    #[error("no channel attached to the event")]
    MissingChannel,

    #[error("user id '{0}' is not numeric")]
    NonNumericUserId(String),

    #[error("no member with id {0}")]
    UnknownMember(u64),

    #[error("bot accounts cannot be added to tickets")]
    BotAccount,

    #[error("ticket name is empty")]
    EmptyName,

    #[error("ticket name is longer than {max} characters")]
    NameTooLong { max: usize },

    #[error("unknown action '{0}'")]
    UnknownAction(String),
}

impl ValidationError {
    fn user_message(&self) -> String {
        match self {
            Self::NotATicketChannel | Self::MissingChannel => {
                "This command can only be used in ticket channels.".to_string()
            },
            Self::NonNumericUserId(raw) => {
                format!("'{raw}' is not a valid user ID. Use the numeric ID.")
            },
            Self::UnknownMember(_) => "Could not find a member with that ID.".to_string(),
            Self::BotAccount => "Bot accounts cannot be added to tickets.".to_string(),
            Self::EmptyName => "The new ticket name cannot be empty.".to_string(),
            Self::NameTooLong { max } => {
                format!("The new ticket name cannot exceed {max} characters.")
            },
            Self::UnknownAction(name) => format!("Unknown action: {name}."),
        }
    }
}

/// Actor lacks the capability an operation requires
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} requires the {required} capability")]
pub struct PermissionDenied {
    pub action: &'static str,
    pub required: Capability,
}

impl PermissionDenied {
    fn user_message(&self) -> String {
        match self.required {
            Capability::Claim => "Only staff members can claim tickets!".to_string(),
            Capability::CloseAny => "You don't have permission to close this ticket!".to_string(),
            Capability::Rename => "You don't have permission to rename tickets!".to_string(),
            Capability::Transcript => {
                "Only staff members can generate transcripts!".to_string()
            },
            Capability::ManageMembers => {
                "You don't have permission to add members to this ticket!".to_string()
            },
        }
    }
}

/// Operation invalid for the ticket's current status
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateConflict {
    #[error("requester already has an active ticket")]
    DuplicateTicket,

    #[error("creation cooldown active for another {}s", .remaining.as_secs())]
    Cooldown { remaining: Duration },

    #[error("ticket is already claimed")]
    AlreadyClaimed,

    #[error("ticket is already closing")]
    AlreadyClosing,

    #[error("ticket is {status} and cannot be changed")]
    TicketClosing { status: TicketStatus },
}

impl StateConflict {
    fn user_message(&self) -> String {
        match self {
            Self::DuplicateTicket => {
                "You already have an open ticket! Please close your existing ticket first."
                    .to_string()
            },
            Self::Cooldown { remaining } => {
                let minutes = remaining.as_secs().div_ceil(60).max(1);
                format!("Please wait {minutes} minutes before creating another ticket.")
            },
            Self::AlreadyClaimed => "This ticket has already been claimed!".to_string(),
            Self::AlreadyClosing => "This ticket is already being closed.".to_string(),
            Self::TicketClosing { .. } => {
                "This ticket is closing and can no longer be changed.".to_string()
            },
        }
    }
}

/// Failure reported by the event platform
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The referenced resource no longer exists
    #[error("{0} not found")]
    NotFound(String),

    /// The platform refused the request
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The platform could not be reached or timed out
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

impl PlatformError {
    /// True when the resource is already gone
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Misuse of the acknowledgment protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("event already acknowledged")]
    AlreadyAcknowledged,

    #[error("finalize called without a deferral")]
    NotDeferred,

    #[error("deferred response already finalized")]
    AlreadyFinalized,

    #[error("event was explicitly left unanswered")]
    Declined,

    #[error("initial response deadline missed")]
    InitialDeadlineMissed,

    #[error("finalize window closed")]
    FinalizeWindowClosed,
}

/// Local persistence failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("durable log corrupt at line {line}: {reason}")]
    CorruptLog { line: usize, reason: String },

    #[error("durable log references unknown ticket {0}")]
    UnknownTicket(u64),
}

impl StorageError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn json(path: &std::path::Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.display().to_string(),
            source,
        }
    }
}
