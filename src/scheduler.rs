//! Deferred ticket deletion
//!
//! Each pending deletion is a tokio task keyed by ticket id. A task sleeps
//! for the grace period, deregisters itself, then runs its deletion. Until
//! it deregisters it can be cancelled, which is what a future "reopen"
//! would use; shutdown aborts everything still waiting.

use crate::core::TicketId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

type PendingMap = Arc<Mutex<HashMap<TicketId, Pending>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<TicketId, Pending>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Named, cancellable deletion timers
#[derive(Debug, Default)]
pub struct DeletionScheduler {
    pending: PendingMap,
    generation: AtomicU64,
}

impl DeletionScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `deletion` for `id` after `delay`
    ///
    /// Returns false, and drops `deletion`, when a deletion for `id` is
    /// already waiting.
    pub fn schedule<F>(&self, id: TicketId, delay: Duration, deletion: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = lock(&self.pending);
        if pending.contains_key(&id) {
            tracing::debug!(ticket = %id, "deletion already scheduled");
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut pending = lock(&registry);
                match pending.get(&id) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&id);
                    },
                    _ => return,
                }
            }
            deletion.await;
        });

        pending.insert(id, Pending { generation, handle });
        tracing::debug!(ticket = %id, delay_ms = delay.as_millis() as u64, "deletion scheduled");
        true
    }

    /// Stop a deletion that has not started yet
    pub fn cancel(&self, id: TicketId) -> bool {
        let Some(entry) = lock(&self.pending).remove(&id) else {
            return false;
        };
        entry.handle.abort();
        tracing::info!(ticket = %id, "scheduled deletion cancelled");
        true
    }

    /// Whether a deletion for `id` is still waiting
    #[must_use]
    pub fn is_pending(&self, id: TicketId) -> bool {
        lock(&self.pending).contains_key(&id)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Abort every waiting deletion; startup reconciliation reschedules them
    pub fn shutdown(&self) -> usize {
        let drained: Vec<_> = lock(&self.pending).drain().collect();
        for (_, entry) in &drained {
            entry.handle.abort();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "aborted pending deletions");
        }
        drained.len()
    }
}

impl Drop for DeletionScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
