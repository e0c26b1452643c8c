//! Ticket record and its state machine
//!
//! A ticket moves `Open → Claimed → Closing → Deleted`, and may skip
//! `Claimed` when it is closed before anyone claims it. The transition
//! methods on [`TicketRecord`] are the only place status changes happen;
//! callers persist the record after a transition succeeds.

use crate::error::StateConflict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic ticket number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(u64);

impl TicketId {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Platform identity of a user or bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Inline mention syntax understood by the platform
    #[must_use]
    pub fn mention(self) -> String {
        format!("<@{}>", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of a platform channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelRef(u64);

impl ChannelRef {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn mention(self) -> String {
        format!("<#{}>", self.0)
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry key of a ticket: the backing channel's name at creation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketKey(String);

impl TicketKey {
    /// Key for ticket `id` under the configured channel prefix
    #[must_use]
    pub fn for_ticket(prefix: &str, id: TicketId) -> Self {
        Self(format!("{prefix}{}", id.value()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TicketKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Claimed,
    Closing,
    Deleted,
}

impl TicketStatus {
    /// Statuses that count against the one-ticket-per-requester rule
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Open | Self::Claimed | Self::Closing)
    }

    /// Statuses from which the ticket can still be changed
    #[must_use]
    pub const fn is_mutable(self) -> bool {
        matches!(self, Self::Open | Self::Claimed)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Claimed => "claimed",
            Self::Closing => "closing",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// One support session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub id: TicketId,
    pub key: TicketKey,
    /// Current name of the backing channel
    pub name: String,
    pub requester: UserId,
    pub claimed_by: Option<UserId>,
    pub status: TicketStatus,
    pub channel: Option<ChannelRef>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl TicketRecord {
    /// A freshly created, unclaimed ticket
    #[must_use]
    pub fn open(
        id: TicketId,
        key: TicketKey,
        requester: UserId,
        channel: ChannelRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: key.as_str().to_string(),
            key,
            requester,
            claimed_by: None,
            status: TicketStatus::Open,
            channel: Some(channel),
            created_at,
            closed_by: None,
            closed_at: None,
        }
    }

    /// Whether `user` opened this ticket
    #[must_use]
    pub fn is_requester(&self, user: UserId) -> bool {
        self.requester == user
    }

    /// Fails unless the ticket is still open or claimed
    pub fn ensure_mutable(&self) -> Result<(), StateConflict> {
        if self.status.is_mutable() {
            Ok(())
        } else {
            Err(StateConflict::TicketClosing {
                status: self.status,
            })
        }
    }

    /// `Open → Claimed`
    pub fn claim(&mut self, actor: UserId) -> Result<(), StateConflict> {
        match self.status {
            TicketStatus::Open => {
                self.status = TicketStatus::Claimed;
                self.claimed_by = Some(actor);
                Ok(())
            },
            _ => Err(StateConflict::AlreadyClaimed),
        }
    }

    /// `Open | Claimed → Closing`
    pub fn begin_close(&mut self, actor: UserId, at: DateTime<Utc>) -> Result<(), StateConflict> {
        match self.status {
            TicketStatus::Open | TicketStatus::Claimed => {
                self.status = TicketStatus::Closing;
                self.closed_by = Some(actor);
                self.closed_at = Some(at);
                Ok(())
            },
            TicketStatus::Closing => Err(StateConflict::AlreadyClosing),
            TicketStatus::Deleted => Err(StateConflict::TicketClosing {
                status: TicketStatus::Deleted,
            }),
        }
    }

    /// Records a new channel name; the key never changes
    pub fn rename(&mut self, name: impl Into<String>) -> Result<(), StateConflict> {
        self.ensure_mutable()?;
        self.name = name.into();
        Ok(())
    }

    /// Terminal transition, releases the channel handle
    pub fn mark_deleted(&mut self) {
        self.status = TicketStatus::Deleted;
        self.channel = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TicketRecord {
        TicketRecord::open(
            TicketId::new(1),
            TicketKey::for_ticket("ticket-", TicketId::new(1)),
            UserId::new(10),
            ChannelRef::new(500),
            Utc::now(),
        )
    }

    #[test]
    fn test_open_record_invariants() {
        let ticket = record();
        assert_eq!(ticket.key.as_str(), "ticket-1");
        assert_eq!(ticket.name, "ticket-1");
        assert_eq!(ticket.status, TicketStatus::Open);
        assert!(ticket.claimed_by.is_none());
        assert!(ticket.channel.is_some());
    }

    #[test]
    fn test_claim_only_from_open() {
        let mut ticket = record();
        ticket.claim(UserId::new(20)).unwrap();
        assert_eq!(ticket.status, TicketStatus::Claimed);
        assert_eq!(ticket.claimed_by, Some(UserId::new(20)));

        let err = ticket.claim(UserId::new(21)).unwrap_err();
        assert_eq!(err, StateConflict::AlreadyClaimed);
        assert_eq!(ticket.claimed_by, Some(UserId::new(20)));
    }

    #[test]
    fn test_close_before_claim_leaves_claimed_by_empty() {
        let mut ticket = record();
        ticket.begin_close(UserId::new(10), Utc::now()).unwrap();
        assert_eq!(ticket.status, TicketStatus::Closing);
        assert!(ticket.claimed_by.is_none());
        assert_eq!(ticket.closed_by, Some(UserId::new(10)));

        let err = ticket.begin_close(UserId::new(10), Utc::now()).unwrap_err();
        assert_eq!(err, StateConflict::AlreadyClosing);
    }

    #[test]
    fn test_closing_ticket_rejects_claim_and_rename() {
        let mut ticket = record();
        ticket.begin_close(UserId::new(10), Utc::now()).unwrap();

        assert_eq!(
            ticket.claim(UserId::new(20)),
            Err(StateConflict::AlreadyClaimed)
        );
        assert!(ticket.claimed_by.is_none());
        assert_eq!(ticket.status, TicketStatus::Closing);
        assert!(ticket.rename("ticket-new").is_err());
        assert_eq!(ticket.name, "ticket-1");
    }

    #[test]
    fn test_mark_deleted_clears_channel() {
        let mut ticket = record();
        ticket.mark_deleted();
        assert_eq!(ticket.status, TicketStatus::Deleted);
        assert!(ticket.channel.is_none());
        assert!(!ticket.status.is_active());
    }
}
