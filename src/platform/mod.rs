//! Interface to the external event platform
//!
//! The lifecycle only needs a narrow slice of what a chat platform offers:
//! private channels, per-user access, messages and member lookup. Every
//! method is a suspension point; callers must not assume registry state is
//! unchanged across an `.await` on it.

mod local;

pub use local::LocalPlatform;

use crate::core::{ChannelRef, UserId};
use crate::error::PlatformError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Result of a platform call
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

static MENTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@!?(\d+)>").expect("mention pattern is valid"));

/// Request for a new private ticket channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub category: String,
    /// Only this user (plus staff) can see the channel
    pub requester: UserId,
}

/// A channel as listed by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel: ChannelRef,
    pub name: String,
}

/// A guild member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: UserId,
    pub tag: String,
    #[serde(default)]
    pub is_bot: bool,
}

/// A message as fetched from, or delivered by, the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: u64,
    pub channel: ChannelRef,
    pub author: UserId,
    pub author_tag: String,
    #[serde(default)]
    pub author_is_bot: bool,
    #[serde(default)]
    pub content: String,
    /// Users the platform resolved as mentioned
    #[serde(default)]
    pub mentions: Vec<UserId>,
    #[serde(default)]
    pub embeds: usize,
    #[serde(default)]
    pub attachments: usize,
    pub created_at: DateTime<Utc>,
}

impl ChannelMessage {
    /// Mentioned users, from the resolved list and inline `<@id>` syntax,
    /// deduplicated in first-seen order
    #[must_use]
    pub fn mentioned_users(&self) -> Vec<UserId> {
        let inline = MENTION_PATTERN
            .captures_iter(&self.content)
            .filter_map(|caps| caps.get(1)?.as_str().parse::<u64>().ok())
            .map(UserId::new);

        let mut seen = Vec::new();
        for user in self.mentions.iter().copied().chain(inline) {
            if !seen.contains(&user) {
                seen.push(user);
            }
        }
        seen
    }
}

/// Operations the ticket lifecycle performs against the platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Platform: Send + Sync {
    /// Creates a private channel visible to the requester and staff
    async fn create_channel(&self, spec: &ChannelSpec) -> PlatformResult<ChannelRef>;

    /// Deletes a channel; `NotFound` when it is already gone
    async fn delete_channel(&self, channel: ChannelRef) -> PlatformResult<()>;

    async fn channel_exists(&self, channel: ChannelRef) -> PlatformResult<bool>;

    /// Channels whose name starts with `prefix`
    async fn list_channels(&self, prefix: &str) -> PlatformResult<Vec<ChannelInfo>>;

    async fn rename_channel(&self, channel: ChannelRef, name: &str) -> PlatformResult<()>;

    /// Whether `user` can view `channel`
    async fn has_access(&self, channel: ChannelRef, user: UserId) -> PlatformResult<bool>;

    /// Lets `user` view and write in `channel`
    async fn grant_access(&self, channel: ChannelRef, user: UserId) -> PlatformResult<()>;

    async fn lookup_member(&self, user: UserId) -> PlatformResult<Option<Member>>;

    /// Posts a notice as the service account
    async fn post_message(&self, channel: ChannelRef, content: &str) -> PlatformResult<()>;

    /// Up to `limit` recent messages; the order is platform-defined
    async fn fetch_messages(
        &self,
        channel: ChannelRef,
        limit: usize,
    ) -> PlatformResult<Vec<ChannelMessage>>;
}
