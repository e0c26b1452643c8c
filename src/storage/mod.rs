//! Persistence for the ticket registry

mod file;
mod log;
mod repository;
mod snapshot;

pub use file::FileStorage;
pub use log::{LogEntry, LogRecord, Replay, max_ticket_id, parse_log};
pub use repository::{CounterStore, Repository, SnapshotStore, TicketLog};
pub use snapshot::Snapshot;
