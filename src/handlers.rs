//! Inbound event surface
//!
//! Every action event runs inside one [`Acknowledger`] window and ends in
//! [`Acknowledger::conclude`], so each event gets exactly one terminal
//! response whatever happens inside. Checks that need no platform call run
//! before the event is acknowledged; anything slow runs after a deferral.

use crate::access::MemberAccessWatcher;
use crate::ack::{AckState, Acknowledger, Outcome, Reply, ResponseSink, Visibility};
use crate::config::{AccessConfig, Config, ProtocolConfig};
use crate::core::{Capability, CapabilitySet, ChannelRef, TicketRecord, UserId};
use crate::error::{Result, ValidationError};
use crate::lifecycle::{GrantOutcome, TicketLifecycle, parse_user_id, sanitize_name};
use crate::platform::{ChannelMessage, Platform};
use crate::transcript::TranscriptGenerator;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::Instrument;
use uuid::Uuid;

/// How many recent event ids are remembered for redelivery detection
const SEEN_CAPACITY: usize = 1024;

/// Action as delivered by the platform, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ActionRequest {
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Validate free-text fields into an [`Action`]
    pub fn parse(&self) -> std::result::Result<Action, ValidationError> {
        match self.action.as_str() {
            "create" => Ok(Action::Create),
            "claim" => Ok(Action::Claim),
            "close" => Ok(Action::Close),
            "transcript" => Ok(Action::Transcript),
            "add-member" => {
                let raw = self.user_id.as_deref().unwrap_or_default();
                Ok(Action::AddMember {
                    target: parse_user_id(raw)?,
                })
            },
            "rename" => {
                let raw = self.name.as_deref().unwrap_or_default();
                Ok(Action::Rename {
                    name: sanitize_name(raw)?,
                })
            },
            other => Err(ValidationError::UnknownAction(other.to_string())),
        }
    }
}

/// A validated action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create,
    Claim,
    Close,
    AddMember { target: UserId },
    Transcript,
    Rename { name: String },
}

impl Action {
    /// Phrase used in the generic failure message
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Create => "creating the ticket",
            Self::Claim => "claiming the ticket",
            Self::Close => "closing the ticket",
            Self::AddMember { .. } => "adding the member",
            Self::Transcript => "generating the transcript",
            Self::Rename { .. } => "renaming the ticket",
        }
    }
}

/// Event on the wire: the actor's roles have not been resolved yet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_id: Uuid,
    pub actor: UserId,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub channel: Option<ChannelRef>,
    #[serde(flatten)]
    pub request: ActionRequest,
}

impl RawEvent {
    /// Resolve the actor's roles into capabilities
    #[must_use]
    pub fn resolve(self, access: &AccessConfig) -> InboundEvent {
        InboundEvent {
            event_id: self.event_id,
            actor: self.actor,
            capabilities: access.resolve(&self.roles),
            channel: self.channel,
            request: self.request,
        }
    }
}

/// An action event ready for handling
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub event_id: Uuid,
    pub actor: UserId,
    pub capabilities: CapabilitySet,
    pub channel: Option<ChannelRef>,
    pub request: ActionRequest,
}

impl InboundEvent {
    #[must_use]
    pub fn new(
        actor: UserId,
        capabilities: CapabilitySet,
        channel: Option<ChannelRef>,
        request: ActionRequest,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            actor,
            capabilities,
            channel,
            request,
        }
    }
}

#[derive(Debug, Default)]
struct SeenEvents {
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
}

impl SeenEvents {
    /// False when `id` was already seen
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

/// Routes inbound events to lifecycle operations
#[derive(Debug)]
pub struct EventHandler {
    desk: Arc<TicketLifecycle>,
    watcher: MemberAccessWatcher,
    transcripts: TranscriptGenerator,
    protocol: ProtocolConfig,
    seen: Mutex<SeenEvents>,
}

impl EventHandler {
    #[must_use]
    pub fn new(desk: Arc<TicketLifecycle>, platform: Arc<dyn Platform>, config: &Config) -> Self {
        Self {
            watcher: MemberAccessWatcher::new(Arc::clone(&desk)),
            transcripts: TranscriptGenerator::new(platform, config.tickets.transcript_limit),
            protocol: config.protocol.clone(),
            desk,
            seen: Mutex::new(SeenEvents::default()),
        }
    }

    #[must_use]
    pub const fn desk(&self) -> &Arc<TicketLifecycle> {
        &self.desk
    }

    fn first_delivery(&self, id: Uuid) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    /// Handle one action event; returns how the event was answered
    pub async fn handle(&self, event: InboundEvent, sink: &dyn ResponseSink) -> AckState {
        let span = tracing::info_span!(
            "event",
            event_id = %event.event_id,
            actor = %event.actor,
            action = %event.request.action
        );
        self.respond(event, sink).instrument(span).await
    }

    async fn respond(&self, event: InboundEvent, sink: &dyn ResponseSink) -> AckState {
        let mut ack = Acknowledger::new(sink, &self.protocol);

        if !self.first_delivery(event.event_id) {
            tracing::debug!("redelivered event declined");
            if let Err(e) = ack.decline() {
                tracing::warn!(error = %e, "could not decline redelivered event");
            }
            return ack.state();
        }

        let action = match event.request.parse() {
            Ok(action) => action,
            Err(e) => {
                return ack.conclude(Err(e.into()), "processing your request").await;
            },
        };

        let label = action.label();
        let outcome = self.dispatch(&event, action, &mut ack).await;
        ack.conclude(outcome, label).await
    }

    async fn dispatch(
        &self,
        event: &InboundEvent,
        action: Action,
        ack: &mut Acknowledger<'_>,
    ) -> Result<Outcome> {
        match action {
            Action::Create => self.create(event, ack).await,
            Action::Claim => self.claim(event),
            Action::Close => self.close(event).await,
            Action::AddMember { target } => self.add_member(event, target, ack).await,
            Action::Transcript => self.transcript(event, ack).await,
            Action::Rename { name } => self.rename(event, &name, ack).await,
        }
    }

    fn ticket(&self, event: &InboundEvent) -> Result<TicketRecord> {
        let channel = event.channel.ok_or(ValidationError::MissingChannel)?;
        self.desk.ticket_in(channel)
    }

    async fn create(&self, event: &InboundEvent, ack: &mut Acknowledger<'_>) -> Result<Outcome> {
        let permit = self.desk.admit_creation(event.actor)?;
        ack.acknowledge_deferred(Visibility::Private).await?;

        let record = self.desk.create(permit).await?;
        let channel = record
            .channel
            .map_or_else(|| record.name.clone(), ChannelRef::mention);
        Ok(Outcome::Reply(Reply::private(format!(
            "Ticket created! Check {channel}"
        ))))
    }

    fn claim(&self, event: &InboundEvent) -> Result<Outcome> {
        let ticket = self.ticket(event)?;
        self.desk
            .claim(&ticket.key, event.actor, &event.capabilities)?;
        Ok(Outcome::Reply(Reply::public(format!(
            "This ticket has been claimed by {}",
            event.actor.mention()
        ))))
    }

    async fn close(&self, event: &InboundEvent) -> Result<Outcome> {
        let ticket = self.ticket(event)?;
        self.desk
            .close(&ticket.key, event.actor, &event.capabilities)
            .await?;
        Ok(Outcome::Reply(Reply::public(format!(
            "Closing ticket in {} seconds...",
            self.desk.config().grace_period_secs
        ))))
    }

    async fn add_member(
        &self,
        event: &InboundEvent,
        target: UserId,
        ack: &mut Acknowledger<'_>,
    ) -> Result<Outcome> {
        let ticket = self.ticket(event)?;
        ack.acknowledge_deferred(Visibility::Private).await?;

        let outcome = self
            .desk
            .add_member(&ticket.key, target, event.actor, &event.capabilities)
            .await?;
        let content = match outcome {
            GrantOutcome::Granted => format!("{} has been added to the ticket.", target.mention()),
            GrantOutcome::AlreadyPresent => {
                format!("{} already has access to this ticket.", target.mention())
            },
        };
        Ok(Outcome::Reply(Reply::private(content)))
    }

    async fn transcript(
        &self,
        event: &InboundEvent,
        ack: &mut Acknowledger<'_>,
    ) -> Result<Outcome> {
        let ticket = self.ticket(event)?;
        let ticket = self
            .desk
            .authorize_transcript(&ticket.key, &event.capabilities)?;
        let channel = ticket.channel.ok_or(ValidationError::NotATicketChannel)?;
        ack.acknowledge_deferred(Visibility::Public).await?;

        let artifact = self.transcripts.generate(channel, &ticket.name).await?;
        tracing::info!(ticket = %ticket.key, file = %artifact.file_name, "transcript generated");
        Ok(Outcome::Reply(
            Reply::public(format!(
                "A transcript has been generated by {}",
                event.actor.mention()
            ))
            .with_artifact(artifact),
        ))
    }

    async fn rename(
        &self,
        event: &InboundEvent,
        name: &str,
        ack: &mut Acknowledger<'_>,
    ) -> Result<Outcome> {
        let ticket = self.ticket(event)?;
        event
            .capabilities
            .require(Capability::Rename, "rename tickets")?;
        ack.acknowledge_deferred(Visibility::Public).await?;

        self.desk
            .rename(&ticket.key, name, event.actor, &event.capabilities)
            .await?;
        Ok(Outcome::Reply(Reply::public(format!(
            "Ticket renamed to: {name}"
        ))))
    }

    /// Pass a channel message to the access watcher
    ///
    /// Messages get no response, so failures are only logged.
    pub async fn handle_message(&self, message: &ChannelMessage) -> Vec<UserId> {
        match self.watcher.observe(message).await {
            Ok(granted) => granted,
            Err(e) => {
                tracing::warn!(channel = %message.channel, error = %e, "access watcher failed");
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{OUTSIDER, RecordedResponse, RecordingSink, REQUESTER, STAFF, TestDesk};

    fn handler(fixture: &TestDesk) -> EventHandler {
        EventHandler::new(
            fixture.desk.clone(),
            fixture.platform.clone(),
            &fixture.config,
        )
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!(ActionRequest::new("create").parse().unwrap(), Action::Create);
        assert_eq!(
            ActionRequest::new("add-member")
                .with_user_id("42")
                .parse()
                .unwrap(),
            Action::AddMember {
                target: UserId::new(42)
            }
        );
        assert_eq!(
            ActionRequest::new("rename")
                .with_name("Billing Issue")
                .parse()
                .unwrap(),
            Action::Rename {
                name: "billing-issue".to_string()
            }
        );
        assert_eq!(
            ActionRequest::new("add-member").with_user_id("bob").parse(),
            Err(ValidationError::NonNumericUserId("bob".to_string()))
        );
        assert_eq!(
            ActionRequest::new("rename").parse(),
            Err(ValidationError::EmptyName)
        );
        assert_eq!(
            ActionRequest::new("reopen").parse(),
            Err(ValidationError::UnknownAction("reopen".to_string()))
        );
    }

    #[test]
    fn test_raw_event_wire_format() {
        let json = r#"{
            "event_id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "actor": 200,
            "roles": ["moderator"],
            "channel": 1001,
            "action": "add-member",
            "user_id": "300"
        }"#;
        let raw: RawEvent = serde_json::from_str(json).unwrap();
        let event = raw.resolve(&AccessConfig::default());

        assert!(event.capabilities.contains(Capability::ManageMembers));
        assert_eq!(event.channel, Some(ChannelRef::new(1001)));
        assert_eq!(event.request.user_id.as_deref(), Some("300"));
    }

    #[tokio::test]
    async fn test_create_defers_then_finalizes() {
        let fixture = TestDesk::new();
        let handler = handler(&fixture);
        let sink = RecordingSink::new();

        let event = InboundEvent::new(
            REQUESTER,
            CapabilitySet::new(),
            None,
            ActionRequest::new("create"),
        );
        let state = handler.handle(event, &sink).await;

        assert_eq!(state, AckState::Finalized);
        let responses = sink.responses();
        assert_eq!(responses[0], RecordedResponse::Deferred(Visibility::Private));
        match &responses[1] {
            RecordedResponse::Edited(reply) => {
                assert!(reply.content.starts_with("Ticket created!"));
            },
            other => panic!("Expected finalized reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_create_is_answered_immediately() {
        let fixture = TestDesk::new();
        let handler = handler(&fixture);
        fixture.open_ticket(REQUESTER).await;
        let sink = RecordingSink::new();

        let event = InboundEvent::new(
            REQUESTER,
            CapabilitySet::new(),
            None,
            ActionRequest::new("create"),
        );
        let state = handler.handle(event, &sink).await;

        assert_eq!(state, AckState::Replied);
        assert_eq!(
            sink.responses(),
            vec![RecordedResponse::Replied(Reply::private(
                "You already have an open ticket! Please close your existing ticket first."
            ))]
        );
    }

    #[tokio::test]
    async fn test_redelivered_event_is_declined() {
        let fixture = TestDesk::new();
        let handler = handler(&fixture);
        let record = fixture.open_ticket(REQUESTER).await;
        let sink = RecordingSink::new();

        let event = InboundEvent::new(
            STAFF,
            CapabilitySet::staff(),
            record.channel,
            ActionRequest::new("claim"),
        );
        assert_eq!(handler.handle(event.clone(), &sink).await, AckState::Replied);
        assert_eq!(handler.handle(event, &sink).await, AckState::Declined);
        assert_eq!(sink.responses().len(), 1);
    }

    #[tokio::test]
    async fn test_action_outside_ticket_channel() {
        let fixture = TestDesk::new();
        let handler = handler(&fixture);
        let general = fixture.platform.insert_channel("general");
        let sink = RecordingSink::new();

        let event = InboundEvent::new(
            STAFF,
            CapabilitySet::staff(),
            Some(general),
            ActionRequest::new("claim"),
        );
        handler.handle(event, &sink).await;

        assert_eq!(
            sink.responses(),
            vec![RecordedResponse::Replied(Reply::private(
                "This command can only be used in ticket channels."
            ))]
        );
    }

    #[tokio::test]
    async fn test_transcript_requires_capability_before_deferring() {
        let fixture = TestDesk::new();
        let handler = handler(&fixture);
        let record = fixture.open_ticket(REQUESTER).await;
        let sink = RecordingSink::new();

        let event = InboundEvent::new(
            OUTSIDER,
            CapabilitySet::new(),
            record.channel,
            ActionRequest::new("transcript"),
        );
        let state = handler.handle(event, &sink).await;

        assert_eq!(state, AckState::Replied);
        assert_eq!(
            sink.responses(),
            vec![RecordedResponse::Replied(Reply::private(
                "Only staff members can generate transcripts!"
            ))]
        );
    }

    #[tokio::test]
    async fn test_transcript_delivers_artifact() {
        let fixture = TestDesk::new();
        let handler = handler(&fixture);
        let record = fixture.open_ticket(REQUESTER).await;
        let sink = RecordingSink::new();

        let event = InboundEvent::new(
            STAFF,
            CapabilitySet::staff(),
            record.channel,
            ActionRequest::new("transcript"),
        );
        assert_eq!(handler.handle(event, &sink).await, AckState::Finalized);

        match sink.responses().last() {
            Some(RecordedResponse::Edited(reply)) => {
                let artifact = reply.artifact.as_ref().unwrap();
                assert_eq!(artifact.file_name, "transcript-ticket-1.txt");
                assert!(artifact.body.contains("Welcome"));
            },
            other => panic!("Expected transcript reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_add_member_failure_after_defer_is_finalized() {
        let fixture = TestDesk::new();
        let handler = handler(&fixture);
        let record = fixture.open_ticket(REQUESTER).await;
        let sink = RecordingSink::new();

        let event = InboundEvent::new(
            REQUESTER,
            CapabilitySet::new(),
            record.channel,
            ActionRequest::new("add-member").with_user_id("999"),
        );
        assert_eq!(handler.handle(event, &sink).await, AckState::Finalized);
        assert_eq!(
            sink.responses().last(),
            Some(&RecordedResponse::Edited(Reply::private(
                "Could not find a member with that ID."
            )))
        );
    }

    /// Platform whose channel renames take `delay`
    struct SlowRename {
        inner: Arc<crate::platform::LocalPlatform>,
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl Platform for SlowRename {
        async fn create_channel(
            &self,
            spec: &crate::platform::ChannelSpec,
        ) -> crate::platform::PlatformResult<ChannelRef> {
            self.inner.create_channel(spec).await
        }

        async fn delete_channel(&self, channel: ChannelRef) -> crate::platform::PlatformResult<()> {
            self.inner.delete_channel(channel).await
        }

        async fn channel_exists(
            &self,
            channel: ChannelRef,
        ) -> crate::platform::PlatformResult<bool> {
            self.inner.channel_exists(channel).await
        }

        async fn list_channels(
            &self,
            prefix: &str,
        ) -> crate::platform::PlatformResult<Vec<crate::platform::ChannelInfo>> {
            self.inner.list_channels(prefix).await
        }

        async fn rename_channel(
            &self,
            channel: ChannelRef,
            name: &str,
        ) -> crate::platform::PlatformResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.rename_channel(channel, name).await
        }

        async fn has_access(
            &self,
            channel: ChannelRef,
            user: UserId,
        ) -> crate::platform::PlatformResult<bool> {
            self.inner.has_access(channel, user).await
        }

        async fn grant_access(
            &self,
            channel: ChannelRef,
            user: UserId,
        ) -> crate::platform::PlatformResult<()> {
            self.inner.grant_access(channel, user).await
        }

        async fn lookup_member(
            &self,
            user: UserId,
        ) -> crate::platform::PlatformResult<Option<crate::platform::Member>> {
            self.inner.lookup_member(user).await
        }

        async fn post_message(
            &self,
            channel: ChannelRef,
            content: &str,
        ) -> crate::platform::PlatformResult<()> {
            self.inner.post_message(channel, content).await
        }

        async fn fetch_messages(
            &self,
            channel: ChannelRef,
            limit: usize,
        ) -> crate::platform::PlatformResult<Vec<ChannelMessage>> {
            self.inner.fetch_messages(channel, limit).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_answered_while_a_slow_rename_runs() {
        let fixture = TestDesk::with_config(|config| config.tickets.grace_period_secs = 60);
        let platform: Arc<dyn Platform> = Arc::new(SlowRename {
            inner: fixture.platform.clone(),
            delay: std::time::Duration::from_secs(5),
        });
        let desk = fixture.lifecycle_with(platform.clone());
        let handler = EventHandler::new(desk.clone(), platform, &fixture.config);
        let record = desk
            .create(desk.admit_creation(REQUESTER).unwrap())
            .await
            .unwrap();

        let rename = InboundEvent::new(
            STAFF,
            CapabilitySet::staff(),
            record.channel,
            ActionRequest::new("rename").with_name("billing"),
        );
        let close = InboundEvent::new(
            REQUESTER,
            CapabilitySet::new(),
            record.channel,
            ActionRequest::new("close"),
        );
        let rename_sink = RecordingSink::new();
        let close_sink = RecordingSink::new();

        let (rename_state, close_state) = tokio::join!(
            handler.handle(rename, &rename_sink),
            handler.handle(close, &close_sink)
        );

        assert_eq!(close_state, AckState::Replied);
        assert_eq!(
            close_sink.responses(),
            vec![RecordedResponse::Replied(Reply::public(
                "Closing ticket in 60 seconds..."
            ))]
        );
        assert_eq!(rename_state, AckState::Finalized);
        assert_eq!(
            desk.registry().get(&record.key).unwrap().status,
            crate::core::TicketStatus::Closing
        );
    }
}
