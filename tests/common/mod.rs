//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use support_desk::ack::{Reply, ResponseSink, Visibility};
use support_desk::config::Config;
use support_desk::core::{CapabilitySet, ChannelRef, UserId};
use support_desk::events::EventBus;
use support_desk::handlers::{ActionRequest, EventHandler, InboundEvent};
use support_desk::lifecycle::TicketLifecycle;
use support_desk::platform::{LocalPlatform, Member, PlatformResult};
use tempfile::TempDir;

pub const REQUESTER: UserId = UserId::new(100);
pub const STAFF_1: UserId = UserId::new(200);
pub const STAFF_2: UserId = UserId::new(201);
pub const FRIEND: UserId = UserId::new(400);

/// A desk over temporary storage and an in-memory platform
pub struct Desk {
    pub temp_dir: TempDir,
    pub config: Config,
    pub platform: Arc<LocalPlatform>,
    pub lifecycle: Arc<TicketLifecycle>,
    pub handler: EventHandler,
}

impl Desk {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::default();
        config.storage.data_dir = temp_dir.path().join("desk");
        Self::open(temp_dir, config, Arc::new(LocalPlatform::new()))
    }

    /// Open a desk over existing storage and platform state
    pub fn open(temp_dir: TempDir, config: Config, platform: Arc<LocalPlatform>) -> Self {
        for (id, tag) in [
            (REQUESTER, "requester#0100"),
            (STAFF_1, "staff#0200"),
            (STAFF_2, "staff#0201"),
            (FRIEND, "friend#0400"),
        ] {
            platform.add_member(Member {
                id,
                tag: tag.to_string(),
                is_bot: false,
            });
        }
        let lifecycle = TicketLifecycle::open(&config, platform.clone(), EventBus::new())
            .expect("Failed to open lifecycle");
        let handler = EventHandler::new(lifecycle.clone(), platform.clone(), &config);
        Self {
            temp_dir,
            config,
            platform,
            lifecycle,
            handler,
        }
    }

    /// Simulate a process restart over the same data directory
    pub fn restart(self) -> Self {
        self.lifecycle.shutdown();
        let Self {
            temp_dir,
            config,
            platform,
            ..
        } = self;
        Self::open(temp_dir, config, platform)
    }

    /// Run one action as `actor` and return what was sent back
    pub async fn act(
        &self,
        actor: UserId,
        capabilities: CapabilitySet,
        channel: Option<ChannelRef>,
        request: ActionRequest,
    ) -> Vec<Response> {
        let sink = RecordingSink::default();
        let event = InboundEvent::new(actor, capabilities, channel, request);
        self.handler.handle(event, &sink).await;
        sink.responses()
    }

    pub fn log_len(&self) -> usize {
        use support_desk::storage::{FileStorage, TicketLog};
        FileStorage::new(&self.config.storage.data_dir)
            .read_all()
            .expect("Failed to read log")
            .len()
    }
}

/// One call made on a [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Replied(Reply),
    Deferred(Visibility),
    Edited(Reply),
}

impl Response {
    /// Text of a reply or edit
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Replied(reply) | Self::Edited(reply) => Some(&reply.content),
            Self::Deferred(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    responses: Mutex<Vec<Response>>,
}

impl RecordingSink {
    pub fn responses(&self) -> Vec<Response> {
        self.responses.lock().unwrap().clone()
    }

    fn record(&self, response: Response) -> PlatformResult<()> {
        self.responses.lock().unwrap().push(response);
        Ok(())
    }
}

#[async_trait]
impl ResponseSink for RecordingSink {
    async fn reply(&self, reply: &Reply) -> PlatformResult<()> {
        self.record(Response::Replied(reply.clone()))
    }

    async fn defer(&self, visibility: Visibility) -> PlatformResult<()> {
        self.record(Response::Deferred(visibility))
    }

    async fn edit_reply(&self, reply: &Reply) -> PlatformResult<()> {
        self.record(Response::Edited(reply.clone()))
    }
}
