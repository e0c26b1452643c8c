use super::file::FileStorage;
use super::log::LogRecord;
use super::snapshot::Snapshot;
use crate::error::Result;

/// Append-only durable log of ticket transitions
///
/// This is the authoritative store: every other view of the tickets can be
/// rebuilt from it.
pub trait TicketLog: Send + Sync {
    /// Appends a record; the record is durable once this returns
    fn append(&self, record: &LogRecord) -> Result<()>;

    /// Reads every intact record in sequence order
    fn read_all(&self) -> Result<Vec<LogRecord>>;

    /// Drops a torn final write left behind by a crash
    fn repair(&self) -> Result<bool>;
}

/// Storage for the registry snapshot
pub trait SnapshotStore: Send + Sync {
    /// Loads the last snapshot, if any
    fn load_snapshot(&self) -> Result<Option<Snapshot>>;

    /// Replaces the snapshot
    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Storage for the last issued ticket id
pub trait CounterStore: Send + Sync {
    /// Loads the counter, zero when never written
    fn load_counter(&self) -> Result<u64>;

    /// Persists the counter
    fn save_counter(&self, last_issued: u64) -> Result<()>;
}

/// Combined repository trait
pub trait Repository: TicketLog + SnapshotStore + CounterStore {}

/// Implementation of Repository for types that implement all three traits
impl<T> Repository for T where T: TicketLog + SnapshotStore + CounterStore {}

impl TicketLog for FileStorage {
    fn append(&self, record: &LogRecord) -> Result<()> {
        self.append_log(record)
    }

    fn read_all(&self) -> Result<Vec<LogRecord>> {
        self.read_log()
    }

    fn repair(&self) -> Result<bool> {
        self.truncate_torn_tail()
    }
}

impl SnapshotStore for FileStorage {
    fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        self.read_snapshot()
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.write_snapshot(snapshot)
    }
}

impl CounterStore for FileStorage {
    fn load_counter(&self) -> Result<u64> {
        self.read_counter()
    }

    fn save_counter(&self, last_issued: u64) -> Result<()> {
        self.write_counter(last_issued)
    }
}
