//! Ticket registry
//!
//! The registry is the only writer of ticket state. It keeps the live
//! tickets in memory, but every change is first appended to the durable log;
//! the in-memory index is what you get by replaying that log. After each
//! change a snapshot is written so a restart only has to replay the tail.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! `.await`. Transitions clone the record, apply the change, log it, and only
//! then swap the new record in, so a failed append leaves memory untouched.

use crate::core::{ChannelRef, TicketId, TicketKey, TicketRecord, TicketStatus, UserId};
use crate::error::{DeskError, Result, StateConflict, StorageError, ValidationError};
use crate::events::DeletionReason;
use crate::platform::Platform;
use crate::storage::{LogEntry, LogRecord, Replay, Repository, Snapshot, max_ticket_id};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Exclusive sections keyed by an arbitrary id
///
/// Used for operations that span platform calls, where the registry's own
/// lock cannot be held.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: K) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Nobody outside the map holds these any more
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key).or_default())
    }

    /// Wait for the section for `key`
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        self.slot(key).lock_owned().await
    }

    /// Enter the section for `key` only if nobody is inside
    pub fn try_lock(&self, key: K) -> Option<OwnedMutexGuard<()>> {
        self.slot(key).try_lock_owned().ok()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    tickets: BTreeMap<TicketKey, TicketRecord>,
    by_channel: HashMap<ChannelRef, TicketKey>,
    log_seq: u64,
    last_issued: u64,
}

impl RegistryState {
    fn from_tickets(tickets: BTreeMap<TicketKey, TicketRecord>, log_seq: u64) -> Self {
        let by_channel = tickets
            .values()
            .filter_map(|t| Some((t.channel?, t.key.clone())))
            .collect();
        Self {
            tickets,
            by_channel,
            log_seq,
            last_issued: 0,
        }
    }

    fn put(&mut self, record: TicketRecord) {
        if let Some(channel) = record.channel {
            self.by_channel.insert(channel, record.key.clone());
        }
        self.tickets.insert(record.key.clone(), record);
    }

    fn take(&mut self, key: &TicketKey) -> Option<TicketRecord> {
        let record = self.tickets.remove(key)?;
        if let Some(channel) = record.channel {
            self.by_channel.remove(&channel);
        }
        Some(record)
    }

    fn active_for(&self, requester: UserId) -> Option<&TicketRecord> {
        self.tickets
            .values()
            .find(|t| t.requester == requester && t.status.is_active())
    }

    fn record(&self, key: &TicketKey) -> Result<&TicketRecord> {
        self.tickets
            .get(key)
            .ok_or(DeskError::Validation(ValidationError::NotATicketChannel))
    }
}

/// What startup reconciliation did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Last issued id after reconciliation
    pub last_issued: u64,
    /// Set when the stored counter was behind the log
    pub counter_raised_from: Option<u64>,
    /// Tickets removed because their channel no longer exists
    pub missing_channels: Vec<TicketKey>,
    /// Tickets left in `Closing` whose deletion must be rescheduled
    pub closing: Vec<TicketRecord>,
    /// Prefixed channels no ticket referenced, deleted as orphans
    pub orphans_removed: Vec<String>,
}

/// Authoritative index of live tickets
pub struct TicketRegistry {
    repo: Arc<dyn Repository>,
    prefix: String,
    state: Mutex<RegistryState>,
    counter_raised_from: Option<u64>,
}

impl std::fmt::Debug for TicketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("TicketRegistry")
            .field("prefix", &self.prefix)
            .field("tickets", &state.tickets.len())
            .field("log_seq", &state.log_seq)
            .field("last_issued", &state.last_issued)
            .finish()
    }
}

impl TicketRegistry {
    /// Rebuild the registry from persisted state
    ///
    /// Uses the snapshot plus the log tail when the snapshot is consistent
    /// with the log, and a full replay otherwise. The id counter is raised to
    /// the highest id the log mentions.
    pub fn load(repo: Arc<dyn Repository>, prefix: impl Into<String>) -> Result<Self> {
        repo.repair()?;
        Self::rebuild(repo, prefix.into(), true)
    }

    /// Rebuild the registry without writing anything back
    ///
    /// A torn final log line is skipped instead of truncated and a lagging
    /// counter is only raised in memory, so this is safe to run next to a
    /// live server.
    pub fn load_read_only(repo: Arc<dyn Repository>, prefix: impl Into<String>) -> Result<Self> {
        Self::rebuild(repo, prefix.into(), false)
    }

    fn rebuild(repo: Arc<dyn Repository>, prefix: String, persist: bool) -> Result<Self> {
        let records = repo.read_all()?;
        let last_seq = records.last().map_or(0, |r| r.seq);

        let snapshot = match repo.load_snapshot() {
            Ok(snapshot) => snapshot.filter(|s| s.log_seq <= last_seq),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable snapshot");
                None
            },
        };

        let tickets = match snapshot {
            Some(snapshot) => {
                let from = snapshot.log_seq;
                replay(Replay::from_tickets(snapshot.tickets), &records, from).or_else(|e| {
                    tracing::warn!(error = %e, "snapshot inconsistent with log, replaying fully");
                    replay(Replay::default(), &records, 0)
                })?
            },
            None => replay(Replay::default(), &records, 0)?,
        };

        let mut state = RegistryState::from_tickets(tickets, last_seq);

        let stored = repo.load_counter()?;
        let logged = max_ticket_id(&records).map_or(0, TicketId::value);
        state.last_issued = stored.max(logged);
        let counter_raised_from = if logged > stored {
            if persist {
                repo.save_counter(logged)?;
            }
            tracing::warn!(stored, logged, "ticket counter behind durable log, raised");
            Some(stored)
        } else {
            None
        };

        tracing::info!(
            tickets = state.tickets.len(),
            log_seq = state.log_seq,
            last_issued = state.last_issued,
            "registry loaded"
        );

        Ok(Self {
            repo,
            prefix,
            state: Mutex::new(state),
            counter_raised_from,
        })
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key a ticket with `id` gets
    #[must_use]
    pub fn key_for(&self, id: TicketId) -> TicketKey {
        TicketKey::for_ticket(&self.prefix, id)
    }

    /// Issue the next id; the counter is durable before the id is returned
    pub fn reserve_id(&self) -> Result<TicketId> {
        let mut state = self.state();
        let next = state.last_issued + 1;
        self.repo.save_counter(next)?;
        state.last_issued = next;
        Ok(TicketId::new(next))
    }

    #[must_use]
    pub fn last_issued(&self) -> u64 {
        self.state().last_issued
    }

    #[must_use]
    pub fn log_seq(&self) -> u64 {
        self.state().log_seq
    }

    #[must_use]
    pub fn get(&self, key: &TicketKey) -> Option<TicketRecord> {
        self.state().tickets.get(key).cloned()
    }

    #[must_use]
    pub fn by_channel(&self, channel: ChannelRef) -> Option<TicketRecord> {
        let state = self.state();
        let key = state.by_channel.get(&channel)?;
        state.tickets.get(key).cloned()
    }

    /// The requester's ticket that is open, claimed or closing
    #[must_use]
    pub fn active_for(&self, requester: UserId) -> Option<TicketRecord> {
        self.state().active_for(requester).cloned()
    }

    /// All live tickets in key order
    #[must_use]
    pub fn list(&self) -> Vec<TicketRecord> {
        self.state().tickets.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().tickets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a freshly created ticket
    pub fn insert(&self, record: TicketRecord) -> Result<()> {
        let channel = record
            .channel
            .ok_or(DeskError::Validation(ValidationError::MissingChannel))?;

        let mut state = self.state();
        if state.active_for(record.requester).is_some() {
            return Err(StateConflict::DuplicateTicket.into());
        }
        if state.tickets.contains_key(&record.key) {
            return Err(StateConflict::DuplicateTicket.into());
        }

        self.append(
            &mut state,
            LogEntry::Insert {
                id: record.id,
                key: record.key.clone(),
                requester: record.requester,
                channel,
                status: record.status,
                created_at: record.created_at,
            },
        )?;
        tracing::info!(ticket = %record.key, requester = %record.requester, "ticket registered");
        state.put(record);
        self.save_snapshot(&state);
        Ok(())
    }

    /// `Open → Claimed`
    pub fn claim(&self, key: &TicketKey, actor: UserId) -> Result<TicketRecord> {
        self.update(key, |record| {
            record.claim(actor)?;
            Ok(LogEntry::Claim {
                id: record.id,
                claimed_by: actor,
            })
        })
    }

    /// `Open | Claimed → Closing`
    pub fn begin_close(&self, key: &TicketKey, actor: UserId) -> Result<TicketRecord> {
        let at = Utc::now();
        self.update(key, |record| {
            record.begin_close(actor, at)?;
            Ok(LogEntry::Close {
                id: record.id,
                status: record.status,
                closed_by: actor,
                closed_at: at,
            })
        })
    }

    /// Record a new channel name for the ticket
    pub fn rename(&self, key: &TicketKey, name: &str) -> Result<TicketRecord> {
        self.update(key, |record| {
            record.rename(name)?;
            Ok(LogEntry::Rename {
                id: record.id,
                name: name.to_string(),
            })
        })
    }

    /// Drop a ticket from the registry
    ///
    /// Returns the record, marked deleted, or `None` when it was already
    /// gone, so a deletion is only ever reported once.
    pub fn remove(&self, key: &TicketKey, reason: DeletionReason) -> Result<Option<TicketRecord>> {
        let mut state = self.state();
        let Some(id) = state.tickets.get(key).map(|t| t.id) else {
            return Ok(None);
        };

        self.append(&mut state, LogEntry::Delete { id, reason })?;
        let mut record = state.take(key).ok_or(StorageError::UnknownTicket(id.value()))?;
        record.mark_deleted();
        tracing::info!(ticket = %key, ?reason, "ticket removed");
        self.save_snapshot(&state);
        Ok(Some(record))
    }

    fn update<F>(&self, key: &TicketKey, transition: F) -> Result<TicketRecord>
    where
        F: FnOnce(&mut TicketRecord) -> Result<LogEntry>,
    {
        let mut state = self.state();
        let mut record = state.record(key)?.clone();
        let entry = transition(&mut record)?;

        self.append(&mut state, entry)?;
        state.put(record.clone());
        self.save_snapshot(&state);
        Ok(record)
    }

    fn append(&self, state: &mut RegistryState, entry: LogEntry) -> Result<()> {
        let seq = state.log_seq + 1;
        tracing::debug!(
            seq,
            op = entry.op(),
            ticket = %entry.ticket_id(),
            "appending to durable log"
        );
        self.repo.append(&LogRecord {
            seq,
            at: Utc::now(),
            entry,
        })?;
        state.log_seq = seq;
        Ok(())
    }

    fn save_snapshot(&self, state: &RegistryState) {
        let snapshot = Snapshot::new(state.log_seq, state.tickets.clone());
        if let Err(e) = self.repo.save_snapshot(&snapshot) {
            tracing::warn!(error = %e, "failed to write snapshot");
        }
    }

    /// Write the snapshot now
    pub fn checkpoint(&self) -> Result<()> {
        let state = self.state();
        let snapshot = Snapshot::new(state.log_seq, state.tickets.clone());
        self.repo.save_snapshot(&snapshot)
    }

    /// Bring the registry in line with what exists on the platform
    ///
    /// Tickets whose channel disappeared are removed, prefixed channels no
    /// ticket owns are deleted, and tickets stuck in `Closing` are returned
    /// so the caller can reschedule their deletion.
    pub async fn reconcile(&self, platform: &dyn Platform) -> Result<ReconcileReport> {
        let mut report = ReconcileReport {
            last_issued: self.last_issued(),
            counter_raised_from: self.counter_raised_from,
            ..ReconcileReport::default()
        };

        for record in self.list() {
            let Some(channel) = record.channel else {
                continue;
            };
            match platform.channel_exists(channel).await {
                Ok(true) => {},
                Ok(false) => {
                    tracing::warn!(ticket = %record.key, %channel, "ticket channel missing");
                    if self.remove(&record.key, DeletionReason::ChannelMissing)?.is_some() {
                        report.missing_channels.push(record.key.clone());
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        ticket = %record.key,
                        error = %e,
                        "could not check ticket channel"
                    );
                },
            }
        }

        report.closing = self
            .list()
            .into_iter()
            .filter(|t| t.status == TicketStatus::Closing)
            .collect();

        match platform.list_channels(&self.prefix).await {
            Ok(channels) => {
                for info in channels {
                    if self.by_channel(info.channel).is_some() {
                        continue;
                    }
                    match platform.delete_channel(info.channel).await {
                        Ok(()) => {
                            tracing::info!(channel = %info.name, "deleted orphaned ticket channel");
                            report.orphans_removed.push(info.name);
                        },
                        Err(e) if e.is_not_found() => {},
                        Err(e) => {
                            tracing::warn!(
                                channel = %info.name,
                                error = %e,
                                "failed to delete orphaned channel"
                            );
                        },
                    }
                }
            },
            Err(e) => tracing::warn!(error = %e, "could not list ticket channels"),
        }

        self.checkpoint()?;
        Ok(report)
    }
}

fn replay(
    mut replay: Replay,
    records: &[LogRecord],
    after: u64,
) -> std::result::Result<BTreeMap<TicketKey, TicketRecord>, StorageError> {
    for record in records.iter().filter(|r| r.seq > after) {
        replay.apply(&record.entry)?;
    }
    Ok(replay.into_tickets())
}
