//! Snapshot of the registry
//!
//! The snapshot is a fast-restart optimisation and never the authority: it
//! records the log sequence it reflects so startup only replays the log
//! tail. A missing, unreadable or inconsistent snapshot is ignored.

use crate::core::{TicketKey, TicketRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full dump of the live tickets, keyed by ticket key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Sequence number of the last log record folded into `tickets`
    pub log_seq: u64,
    pub tickets: BTreeMap<TicketKey, TicketRecord>,
}

impl Snapshot {
    #[must_use]
    pub const fn new(log_seq: u64, tickets: BTreeMap<TicketKey, TicketRecord>) -> Self {
        Self { log_seq, tickets }
    }
}
