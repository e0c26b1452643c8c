//! Test utilities for support-desk
//!
//! Shared fixtures: a lifecycle over temporary storage and an in-memory
//! platform, plus a response sink that records what was sent.

#![cfg(test)]

use crate::ack::{Reply, ResponseSink, Visibility};
use crate::config::Config;
use crate::core::{TicketRecord, UserId};
use crate::error::PlatformError;
use crate::events::EventBus;
use crate::lifecycle::TicketLifecycle;
use crate::platform::{LocalPlatform, Member, Platform, PlatformResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const REQUESTER: UserId = UserId::new(100);
pub const STAFF: UserId = UserId::new(200);
pub const STAFF_2: UserId = UserId::new(201);
pub const OUTSIDER: UserId = UserId::new(300);

/// Lifecycle wired to temporary storage and a [`LocalPlatform`]
pub struct TestDesk {
    pub temp_dir: TempDir,
    pub config: Config,
    pub platform: Arc<LocalPlatform>,
    pub desk: Arc<TicketLifecycle>,
}

impl TestDesk {
    /// Create a fixture with default settings
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a fixture after adjusting the default configuration
    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::default();
        config.storage.data_dir = temp_dir.path().join("desk");
        adjust(&mut config);

        let platform = Arc::new(LocalPlatform::new());
        for (id, tag) in [
            (REQUESTER, "requester#0100"),
            (STAFF, "staff#0200"),
            (STAFF_2, "staff#0201"),
            (OUTSIDER, "outsider#0300"),
        ] {
            platform.add_member(Member {
                id,
                tag: tag.to_string(),
                is_bot: false,
            });
        }

        let desk = TicketLifecycle::open(&config, platform.clone(), EventBus::new())
            .expect("Failed to open lifecycle");

        Self {
            temp_dir,
            config,
            platform,
            desk,
        }
    }

    /// A second lifecycle over a fresh data directory and `platform`
    pub fn lifecycle_with(&self, platform: Arc<dyn Platform>) -> Arc<TicketLifecycle> {
        let mut config = self.config.clone();
        config.storage.data_dir = self.temp_dir.path().join("other");
        TicketLifecycle::open(&config, platform, EventBus::new()).expect("Failed to open lifecycle")
    }

    /// Create a ticket for `requester`
    pub async fn open_ticket(&self, requester: UserId) -> TicketRecord {
        let permit = self
            .desk
            .admit_creation(requester)
            .expect("Creation not admitted");
        self.desk.create(permit).await.expect("Failed to create ticket")
    }

    /// Register a human member on the platform
    pub fn member(&self, id: u64, tag: &str) -> UserId {
        let id = UserId::new(id);
        self.platform.add_member(Member {
            id,
            tag: tag.to_string(),
            is_bot: false,
        });
        id
    }

    /// Register a bot account on the platform
    pub fn bot(&self, id: u64) -> UserId {
        let id = UserId::new(id);
        self.platform.add_member(Member {
            id,
            tag: format!("bot#{id}"),
            is_bot: true,
        });
        id
    }
}

/// One call made on a [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedResponse {
    Replied(Reply),
    Deferred(Visibility),
    Edited(Reply),
}

/// Response sink that records every successful call
#[derive(Debug, Default)]
pub struct RecordingSink {
    responses: Mutex<Vec<RecordedResponse>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every call fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn responses(&self) -> Vec<RecordedResponse> {
        self.responses.lock().unwrap().clone()
    }

    fn record(&self, response: RecordedResponse) -> PlatformResult<()> {
        if self.fail {
            return Err(PlatformError::Unavailable("sink offline".to_string()));
        }
        self.responses.lock().unwrap().push(response);
        Ok(())
    }
}

#[async_trait]
impl ResponseSink for RecordingSink {
    async fn reply(&self, reply: &Reply) -> PlatformResult<()> {
        self.record(RecordedResponse::Replied(reply.clone()))
    }

    async fn defer(&self, visibility: Visibility) -> PlatformResult<()> {
        self.record(RecordedResponse::Deferred(visibility))
    }

    async fn edit_reply(&self, reply: &Reply) -> PlatformResult<()> {
        self.record(RecordedResponse::Edited(reply.clone()))
    }
}
