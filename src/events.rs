//! Lifecycle event broadcasting
//!
//! Every committed transition is published on an [`EventBus`] after it has
//! been persisted. Subscribers (the console server, tests) observe the
//! stream; nothing in the lifecycle depends on anyone listening.

use crate::core::{TicketKey, TicketRecord, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of the broadcast buffer; slow subscribers lag past this
const EVENT_BUFFER: usize = 256;

/// Committed lifecycle transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Created {
        ticket: TicketRecord,
    },
    Claimed {
        key: TicketKey,
        by: UserId,
    },
    Closing {
        key: TicketKey,
        by: UserId,
    },
    Deleted {
        ticket: TicketRecord,
        reason: DeletionReason,
    },
    MemberAdded {
        key: TicketKey,
        member: UserId,
        by: UserId,
    },
    Renamed {
        key: TicketKey,
        name: String,
    },
}

/// Why a ticket left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionReason {
    /// Grace period after `close` elapsed
    Closed,
    /// Backing channel was gone at startup
    ChannelMissing,
}

/// Fan-out of lifecycle events to any number of subscribers
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: LifecycleEvent) {
        tracing::debug!(?event, "lifecycle event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
