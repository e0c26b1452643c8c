//! Durable log format and replay
//!
//! The log is a JSON-lines file of [`LogRecord`]s with strictly increasing
//! sequence numbers. It is the authority for which tickets exist: the
//! in-memory index and the snapshot are both derived from it.

use crate::core::{ChannelRef, TicketId, TicketKey, TicketRecord, TicketStatus, UserId};
use crate::error::StorageError;
use crate::events::DeletionReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One appended line of the durable log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub entry: LogEntry,
}

/// What happened to a ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogEntry {
    Insert {
        id: TicketId,
        key: TicketKey,
        requester: UserId,
        channel: ChannelRef,
        status: TicketStatus,
        created_at: DateTime<Utc>,
    },
    Claim {
        id: TicketId,
        claimed_by: UserId,
    },
    Rename {
        id: TicketId,
        name: String,
    },
    Close {
        id: TicketId,
        status: TicketStatus,
        closed_by: UserId,
        closed_at: DateTime<Utc>,
    },
    Delete {
        id: TicketId,
        reason: DeletionReason,
    },
}

impl LogEntry {
    #[must_use]
    pub const fn ticket_id(&self) -> TicketId {
        match self {
            Self::Insert { id, .. }
            | Self::Claim { id, .. }
            | Self::Rename { id, .. }
            | Self::Close { id, .. }
            | Self::Delete { id, .. } => *id,
        }
    }

    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Claim { .. } => "claim",
            Self::Rename { .. } => "rename",
            Self::Close { .. } => "close",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Parse the log file contents
///
/// A malformed final line is a write torn by a crash and is dropped with a
/// warning. A malformed line anywhere else means the file is corrupt.
pub fn parse_log(contents: &str) -> Result<Vec<LogRecord>, StorageError> {
    let lines: Vec<(usize, &str)> = contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    let mut records = Vec::with_capacity(lines.len());
    let last = lines.len().saturating_sub(1);

    for (position, (line_no, line)) in lines.into_iter().enumerate() {
        match serde_json::from_str::<LogRecord>(line) {
            Ok(record) => {
                if let Some(prev) = records.last().map(|r: &LogRecord| r.seq) {
                    if record.seq <= prev {
                        return Err(StorageError::CorruptLog {
                            line: line_no + 1,
                            reason: format!("sequence {} does not follow {prev}", record.seq),
                        });
                    }
                }
                records.push(record);
            },
            Err(e) if position == last => {
                tracing::warn!(line = line_no + 1, error = %e, "dropping torn final log line");
            },
            Err(e) => {
                return Err(StorageError::CorruptLog {
                    line: line_no + 1,
                    reason: e.to_string(),
                });
            },
        }
    }

    Ok(records)
}

/// Highest ticket id mentioned anywhere in the log
#[must_use]
pub fn max_ticket_id(records: &[LogRecord]) -> Option<TicketId> {
    records.iter().map(|r| r.entry.ticket_id()).max()
}

/// Rebuilds the live ticket set by applying log records in order
#[derive(Debug, Default)]
pub struct Replay {
    tickets: BTreeMap<TicketKey, TicketRecord>,
    keys: HashMap<TicketId, TicketKey>,
}

impl Replay {
    /// Start from a previously materialised ticket set
    #[must_use]
    pub fn from_tickets(tickets: BTreeMap<TicketKey, TicketRecord>) -> Self {
        let keys = tickets
            .values()
            .map(|t| (t.id, t.key.clone()))
            .collect();
        Self { tickets, keys }
    }

    /// Apply one entry
    pub fn apply(&mut self, entry: &LogEntry) -> Result<(), StorageError> {
        if let LogEntry::Insert {
            id,
            key,
            requester,
            channel,
            status,
            created_at,
        } = entry
        {
            let mut record =
                TicketRecord::open(*id, key.clone(), *requester, *channel, *created_at);
            record.status = *status;
            self.keys.insert(*id, key.clone());
            self.tickets.insert(key.clone(), record);
            return Ok(());
        }

        let id = entry.ticket_id();
        let key = self
            .keys
            .get(&id)
            .cloned()
            .ok_or(StorageError::UnknownTicket(id.value()))?;

        if let LogEntry::Delete { .. } = entry {
            self.keys.remove(&id);
            self.tickets.remove(&key);
            return Ok(());
        }

        let ticket = self
            .tickets
            .get_mut(&key)
            .ok_or(StorageError::UnknownTicket(id.value()))?;

        match entry {
            LogEntry::Claim { claimed_by, .. } => {
                ticket.status = TicketStatus::Claimed;
                ticket.claimed_by = Some(*claimed_by);
            },
            LogEntry::Rename { name, .. } => ticket.name.clone_from(name),
            LogEntry::Close {
                status,
                closed_by,
                closed_at,
                ..
            } => {
                ticket.status = *status;
                ticket.closed_by = Some(*closed_by);
                ticket.closed_at = Some(*closed_at);
            },
            LogEntry::Insert { .. } | LogEntry::Delete { .. } => {},
        }

        Ok(())
    }

    #[must_use]
    pub fn into_tickets(self) -> BTreeMap<TicketKey, TicketRecord> {
        self.tickets
    }
}
