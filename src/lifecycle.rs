//! Ticket lifecycle operations
//!
//! [`TicketLifecycle`] ties the registry to the platform. Each operation
//! checks the actor's capabilities, performs its platform calls, and records
//! the transition through the registry before publishing a
//! [`LifecycleEvent`].
//!
//! Operations that span platform calls hold a per-ticket exclusive section
//! (or, for creation, a per-requester one) so interleaved events for the same
//! ticket never observe each other's half-finished work. `claim` and `close`
//! touch no platform state and go straight to the registry.

use crate::config::{Config, TicketConfig};
use crate::cooldown::CooldownGuard;
use crate::core::{
    Capability, CapabilitySet, ChannelRef, TicketKey, TicketRecord, TicketStatus, UserId,
};
use crate::error::{Result, StateConflict, ValidationError};
use crate::events::{DeletionReason, EventBus, LifecycleEvent};
use crate::platform::{ChannelSpec, Platform};
use crate::registry::{KeyedLocks, ReconcileReport, TicketRegistry};
use crate::scheduler::DeletionScheduler;
use crate::storage::FileStorage;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Longest ticket name accepted by `rename`, without the channel prefix
pub const MAX_NAME_LEN: usize = 90;

/// Proof that a creation passed the duplicate and cooldown checks
///
/// Holds the requester's exclusive section until the creation finishes, so a
/// second creation for the same requester is refused while this one is in
/// flight.
#[derive(Debug)]
pub struct CreationPermit {
    requester: UserId,
    _section: OwnedMutexGuard<()>,
}

impl CreationPermit {
    #[must_use]
    pub const fn requester(&self) -> UserId {
        self.requester
    }
}

/// Result of granting a member access to a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    AlreadyPresent,
}

/// Normalize a requested ticket name
///
/// Trims, lowercases and collapses whitespace runs into `-`.
pub fn sanitize_name(raw: &str) -> std::result::Result<String, ValidationError> {
    let name = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();

    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong { max: MAX_NAME_LEN });
    }
    Ok(name)
}

/// Parse a user id typed by an actor
pub fn parse_user_id(raw: &str) -> std::result::Result<UserId, ValidationError> {
    let trimmed = raw.trim();
    trimmed
        .parse::<u64>()
        .map(UserId::new)
        .map_err(|_| ValidationError::NonNumericUserId(trimmed.to_string()))
}

/// Create, claim, close, rename and tear down tickets
pub struct TicketLifecycle {
    config: TicketConfig,
    registry: TicketRegistry,
    platform: Arc<dyn Platform>,
    cooldown: CooldownGuard,
    scheduler: DeletionScheduler,
    events: EventBus,
    requesters: KeyedLocks<UserId>,
    tickets: KeyedLocks<TicketKey>,
}

impl std::fmt::Debug for TicketLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketLifecycle")
            .field("registry", &self.registry)
            .field("pending_deletions", &self.scheduler.pending_count())
            .finish_non_exhaustive()
    }
}

impl TicketLifecycle {
    pub fn new(
        config: TicketConfig,
        registry: TicketRegistry,
        platform: Arc<dyn Platform>,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            cooldown: CooldownGuard::new(config.cooldown()),
            config,
            registry,
            platform,
            scheduler: DeletionScheduler::new(),
            events,
            requesters: KeyedLocks::new(),
            tickets: KeyedLocks::new(),
        })
    }

    /// Load persisted state from the configured data directory
    pub fn open(
        config: &Config,
        platform: Arc<dyn Platform>,
        events: EventBus,
    ) -> Result<Arc<Self>> {
        let storage = FileStorage::new(&config.storage.data_dir);
        storage.ensure_directories()?;
        let registry = TicketRegistry::load(Arc::new(storage), &config.tickets.channel_prefix)?;
        Ok(Self::new(config.tickets.clone(), registry, platform, events))
    }

    #[must_use]
    pub const fn registry(&self) -> &TicketRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn config(&self) -> &TicketConfig {
        &self.config
    }

    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub const fn cooldown(&self) -> &CooldownGuard {
        &self.cooldown
    }

    #[must_use]
    pub const fn scheduler(&self) -> &DeletionScheduler {
        &self.scheduler
    }

    pub(crate) fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    /// Ticket backed by `channel`
    pub fn ticket_in(&self, channel: ChannelRef) -> Result<TicketRecord> {
        self.registry
            .by_channel(channel)
            .ok_or_else(|| ValidationError::NotATicketChannel.into())
    }

    fn ticket(&self, key: &TicketKey) -> Result<TicketRecord> {
        self.registry
            .get(key)
            .ok_or_else(|| ValidationError::NotATicketChannel.into())
    }

    /// Check whether `requester` may create a ticket now
    ///
    /// Cheap and synchronous so it can run before the event is acknowledged.
    /// A granted permit consumes the cooldown slot even if the creation
    /// fails later.
    pub fn admit_creation(&self, requester: UserId) -> Result<CreationPermit> {
        let section = self
            .requesters
            .try_lock(requester)
            .ok_or(StateConflict::DuplicateTicket)?;

        if let Some(existing) = self.registry.active_for(requester) {
            tracing::debug!(%requester, ticket = %existing.key, "requester already has a ticket");
            return Err(StateConflict::DuplicateTicket.into());
        }

        self.cooldown
            .try_acquire(requester)
            .map_err(|remaining| StateConflict::Cooldown { remaining })?;

        Ok(CreationPermit {
            requester,
            _section: section,
        })
    }

    /// Create the ticket a permit was granted for
    pub async fn create(&self, permit: CreationPermit) -> Result<TicketRecord> {
        let requester = permit.requester;
        let id = self.registry.reserve_id()?;
        let key = self.registry.key_for(id);

        let channel = self
            .platform
            .create_channel(&ChannelSpec {
                name: key.as_str().to_string(),
                category: self.config.category.clone(),
                requester,
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    %requester,
                    ticket = %key,
                    error = %e,
                    "ticket channel creation failed"
                );
            })?;

        let welcome = format!("Welcome {}! {}", requester.mention(), self.config.welcome_message);
        if let Err(e) = self.platform.post_message(channel, &welcome).await {
            tracing::warn!(ticket = %key, error = %e, "failed to post welcome message");
        }

        let record = TicketRecord::open(id, key, requester, channel, Utc::now());
        if let Err(e) = self.registry.insert(record.clone()) {
            tracing::error!(ticket = %record.key, error = %e, "failed to persist new ticket");
            if let Err(cleanup) = self.platform.delete_channel(channel).await {
                tracing::warn!(%channel, error = %cleanup, "left channel for the startup sweep");
            }
            return Err(e);
        }

        tracing::info!(ticket = %record.key, %requester, %channel, "ticket created");
        self.events.publish(LifecycleEvent::Created {
            ticket: record.clone(),
        });
        drop(permit);
        Ok(record)
    }

    /// Staff takes ownership of an open ticket
    pub fn claim(
        &self,
        key: &TicketKey,
        actor: UserId,
        caps: &CapabilitySet,
    ) -> Result<TicketRecord> {
        caps.require(Capability::Claim, "claim tickets")?;
        let record = self.registry.claim(key, actor)?;

        tracing::info!(ticket = %key, %actor, "ticket claimed");
        self.events.publish(LifecycleEvent::Claimed {
            key: key.clone(),
            by: actor,
        });
        Ok(record)
    }

    /// Move a ticket to `Closing` and schedule its deletion
    ///
    /// Takes no exclusive section: the status change is a single registry
    /// update, so closing never waits behind another operation's platform
    /// calls. `delete` re-checks the status under the ticket's section.
    pub async fn close(
        self: &Arc<Self>,
        key: &TicketKey,
        actor: UserId,
        caps: &CapabilitySet,
    ) -> Result<TicketRecord> {
        let ticket = self.ticket(key)?;
        if !ticket.is_requester(actor) {
            caps.require(Capability::CloseAny, "close tickets")?;
        }

        let record = self.registry.begin_close(key, actor)?;

        tracing::info!(ticket = %key, %actor, "ticket closing");
        self.events.publish(LifecycleEvent::Closing {
            key: key.clone(),
            by: actor,
        });
        self.schedule_deletion(&record);
        Ok(record)
    }

    fn schedule_deletion(self: &Arc<Self>, record: &TicketRecord) -> bool {
        let desk = Arc::downgrade(self);
        let key = record.key.clone();
        self.scheduler
            .schedule(record.id, self.config.grace_period(), async move {
                let Some(desk) = desk.upgrade() else {
                    return;
                };
                if let Err(e) = desk.delete(&key).await {
                    tracing::error!(ticket = %key, error = %e, "scheduled deletion failed");
                }
            })
    }

    /// Physically delete a closing ticket
    ///
    /// Returns `None` when there is nothing to delete, so the `Deleted` event
    /// is published at most once per ticket. When the platform refuses the
    /// deletion the ticket stays `Closing` for the next startup sweep.
    pub async fn delete(&self, key: &TicketKey) -> Result<Option<TicketRecord>> {
        let _section = self.tickets.lock(key.clone()).await;
        let Some(ticket) = self.registry.get(key) else {
            return Ok(None);
        };
        if ticket.status != TicketStatus::Closing {
            tracing::warn!(
                ticket = %key,
                status = %ticket.status,
                "refusing to delete a ticket that is not closing"
            );
            return Ok(None);
        }

        if let Some(channel) = ticket.channel {
            match self.platform.delete_channel(channel).await {
                Ok(()) => {},
                Err(e) if e.is_not_found() => {
                    tracing::debug!(ticket = %key, "ticket channel already gone");
                },
                Err(e) => return Err(e.into()),
            }
        }

        let removed = self.registry.remove(key, DeletionReason::Closed)?;
        if let Some(record) = &removed {
            tracing::info!(ticket = %key, "ticket deleted");
            self.events.publish(LifecycleEvent::Deleted {
                ticket: record.clone(),
                reason: DeletionReason::Closed,
            });
        }
        Ok(removed)
    }

    /// Give `target` access to a ticket on request
    ///
    /// The actor must hold `ManageMembers` or be the requester.
    pub async fn add_member(
        &self,
        key: &TicketKey,
        target: UserId,
        actor: UserId,
        caps: &CapabilitySet,
    ) -> Result<GrantOutcome> {
        let ticket = self.ticket(key)?;
        if !ticket.is_requester(actor) {
            caps.require(Capability::ManageMembers, "add members")?;
        }
        ticket.ensure_mutable()?;

        let member = self
            .platform
            .lookup_member(target)
            .await?
            .ok_or(ValidationError::UnknownMember(target.value()))?;
        if member.is_bot {
            return Err(ValidationError::BotAccount.into());
        }

        self.grant_once(key, target, actor).await
    }

    /// Grant `target` access unless they already have it
    ///
    /// Serialized per ticket: concurrent grants for one member produce one
    /// platform grant and one notice.
    pub async fn grant_once(
        &self,
        key: &TicketKey,
        target: UserId,
        granter: UserId,
    ) -> Result<GrantOutcome> {
        let _section = self.tickets.lock(key.clone()).await;
        let ticket = self.ticket(key)?;
        ticket.ensure_mutable()?;
        let channel = ticket
            .channel
            .ok_or(ValidationError::NotATicketChannel)?;

        if self.platform.has_access(channel, target).await? {
            return Ok(GrantOutcome::AlreadyPresent);
        }
        self.platform.grant_access(channel, target).await?;

        let notice = format!(
            "{} has been added to the ticket by {}",
            target.mention(),
            granter.mention()
        );
        if let Err(e) = self.platform.post_message(channel, &notice).await {
            tracing::warn!(ticket = %key, error = %e, "failed to post access notice");
        }

        tracing::info!(ticket = %key, member = %target, by = %granter, "member added");
        self.events.publish(LifecycleEvent::MemberAdded {
            key: key.clone(),
            member: target,
            by: granter,
        });
        Ok(GrantOutcome::Granted)
    }

    /// Rename the backing channel to `<prefix><name>`
    pub async fn rename(
        &self,
        key: &TicketKey,
        raw_name: &str,
        actor: UserId,
        caps: &CapabilitySet,
    ) -> Result<TicketRecord> {
        caps.require(Capability::Rename, "rename tickets")?;
        let name = sanitize_name(raw_name)?;

        let _section = self.tickets.lock(key.clone()).await;
        let ticket = self.ticket(key)?;
        ticket.ensure_mutable()?;
        let channel = ticket
            .channel
            .ok_or(ValidationError::NotATicketChannel)?;

        let full_name = format!("{}{name}", self.config.channel_prefix);
        self.platform.rename_channel(channel, &full_name).await?;
        let record = self.registry.rename(key, &full_name)?;

        tracing::info!(ticket = %key, %actor, name = %full_name, "ticket renamed");
        self.events.publish(LifecycleEvent::Renamed {
            key: key.clone(),
            name: full_name,
        });
        Ok(record)
    }

    /// Ticket a transcript may be generated for
    pub fn authorize_transcript(
        &self,
        key: &TicketKey,
        caps: &CapabilitySet,
    ) -> Result<TicketRecord> {
        caps.require(Capability::Transcript, "generate transcripts")?;
        self.ticket(key)
    }

    /// Reconcile persisted state with the platform and resume pending work
    pub async fn startup(self: &Arc<Self>) -> Result<ReconcileReport> {
        let report = self.registry.reconcile(self.platform.as_ref()).await?;
        for record in &report.closing {
            self.schedule_deletion(record);
        }

        tracing::info!(
            last_issued = report.last_issued,
            missing = report.missing_channels.len(),
            rescheduled = report.closing.len(),
            orphans = report.orphans_removed.len(),
            "startup reconciliation finished"
        );
        Ok(report)
    }

    /// Abort pending deletions; the next startup reschedules them
    pub fn shutdown(&self) -> usize {
        self.cooldown.prune();
        self.scheduler.shutdown()
    }
}
