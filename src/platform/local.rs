//! In-memory platform
//!
//! Backs the console server and the test suite. It keeps channels, member
//! access and message history in process memory and returns fetched
//! messages newest-first, the way chat platforms page history.

use super::{ChannelInfo, ChannelMessage, ChannelSpec, Member, Platform, PlatformResult};
use crate::core::{ChannelRef, UserId};
use crate::error::PlatformError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Identity used for messages posted by the service itself
pub const SERVICE_ACCOUNT: UserId = UserId::new(1);

#[derive(Debug)]
struct LocalChannel {
    name: String,
    category: String,
    members: BTreeSet<UserId>,
    messages: Vec<ChannelMessage>,
    grants: usize,
}

#[derive(Debug, Default)]
struct LocalState {
    channels: BTreeMap<ChannelRef, LocalChannel>,
    members: HashMap<UserId, Member>,
    next_channel: u64,
    next_message: u64,
    fail_channel_creation: bool,
    fail_channel_deletion: bool,
}

/// Platform kept entirely in memory
#[derive(Debug, Default)]
pub struct LocalPlatform {
    state: Mutex<LocalState>,
}

impl LocalPlatform {
    #[must_use]
    pub fn new() -> Self {
        let platform = Self::default();
        platform.add_member(Member {
            id: SERVICE_ACCOUNT,
            tag: "support-desk".to_string(),
            is_bot: true,
        });
        platform
    }

    fn state(&self) -> MutexGuard<'_, LocalState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a member so lookups can find them
    pub fn add_member(&self, member: Member) {
        self.state().members.insert(member.id, member);
    }

    /// Make channel creation fail until switched off
    pub fn set_fail_channel_creation(&self, fail: bool) {
        self.state().fail_channel_creation = fail;
    }

    /// Make channel deletion fail until switched off
    pub fn set_fail_channel_deletion(&self, fail: bool) {
        self.state().fail_channel_deletion = fail;
    }

    /// Create a channel outside the lifecycle, e.g. one left over by a crash
    pub fn insert_channel(&self, name: &str) -> ChannelRef {
        let mut state = self.state();
        state.next_channel += 1;
        let channel = ChannelRef::new(1_000 + state.next_channel);
        state.channels.insert(
            channel,
            LocalChannel {
                name: name.to_string(),
                category: String::new(),
                members: BTreeSet::new(),
                messages: Vec::new(),
                grants: 0,
            },
        );
        channel
    }

    /// Recreate a channel under a known reference, visible to `requester`
    ///
    /// The console server uses this to bring back the channels of tickets
    /// recorded by an earlier run, since nothing here outlives the process.
    pub fn restore_channel(&self, channel: ChannelRef, name: &str, requester: UserId) {
        let mut state = self.state();
        let floor = channel.value().saturating_sub(1_000);
        if floor > state.next_channel {
            state.next_channel = floor;
        }
        state.channels.insert(
            channel,
            LocalChannel {
                name: name.to_string(),
                category: String::new(),
                members: [requester, SERVICE_ACCOUNT].into_iter().collect(),
                messages: Vec::new(),
                grants: 0,
            },
        );
    }

    /// Remove a channel without going through the lifecycle
    pub fn remove_channel(&self, channel: ChannelRef) -> bool {
        self.state().channels.remove(&channel).is_some()
    }

    /// Record a message written by a user; returns the stored message
    pub fn push_message(
        &self,
        channel: ChannelRef,
        author: UserId,
        content: &str,
    ) -> PlatformResult<ChannelMessage> {
        let mut state = self.state();
        let (author_tag, author_is_bot) = state
            .members
            .get(&author)
            .map_or_else(|| (format!("user-{author}"), false), |m| (m.tag.clone(), m.is_bot));
        state.next_message += 1;
        let message = ChannelMessage {
            id: state.next_message,
            channel,
            author,
            author_tag,
            author_is_bot,
            content: content.to_string(),
            mentions: Vec::new(),
            embeds: 0,
            attachments: 0,
            created_at: Utc::now(),
        };
        let slot = state
            .channels
            .get_mut(&channel)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel}")))?;
        slot.messages.push(message.clone());
        Ok(message)
    }

    /// Messages stored in a channel, oldest first
    #[must_use]
    pub fn messages(&self, channel: ChannelRef) -> Vec<ChannelMessage> {
        self.state()
            .channels
            .get(&channel)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    /// Notices posted by the service account into a channel
    #[must_use]
    pub fn notices(&self, channel: ChannelRef) -> Vec<String> {
        self.messages(channel)
            .into_iter()
            .filter(|m| m.author == SERVICE_ACCOUNT)
            .map(|m| m.content)
            .collect()
    }

    /// Number of access grants performed on a channel
    #[must_use]
    pub fn grant_count(&self, channel: ChannelRef) -> usize {
        self.state().channels.get(&channel).map_or(0, |c| c.grants)
    }

    #[must_use]
    pub fn channel_name(&self, channel: ChannelRef) -> Option<String> {
        self.state().channels.get(&channel).map(|c| c.name.clone())
    }

    #[must_use]
    pub fn channel_category(&self, channel: ChannelRef) -> Option<String> {
        self.state()
            .channels
            .get(&channel)
            .map(|c| c.category.clone())
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.state().channels.len()
    }
}

#[async_trait]
impl Platform for LocalPlatform {
    async fn create_channel(&self, spec: &ChannelSpec) -> PlatformResult<ChannelRef> {
        let mut state = self.state();
        if state.fail_channel_creation {
            return Err(PlatformError::Unavailable(
                "channel creation disabled".to_string(),
            ));
        }
        state.next_channel += 1;
        let channel = ChannelRef::new(1_000 + state.next_channel);
        let members = [spec.requester, SERVICE_ACCOUNT].into_iter().collect();
        state.channels.insert(
            channel,
            LocalChannel {
                name: spec.name.clone(),
                category: spec.category.clone(),
                members,
                messages: Vec::new(),
                grants: 0,
            },
        );
        Ok(channel)
    }

    async fn delete_channel(&self, channel: ChannelRef) -> PlatformResult<()> {
        let mut state = self.state();
        if state.fail_channel_deletion {
            return Err(PlatformError::Unavailable(
                "channel deletion disabled".to_string(),
            ));
        }
        state
            .channels
            .remove(&channel)
            .map(|_| ())
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel}")))
    }

    async fn channel_exists(&self, channel: ChannelRef) -> PlatformResult<bool> {
        Ok(self.state().channels.contains_key(&channel))
    }

    async fn list_channels(&self, prefix: &str) -> PlatformResult<Vec<ChannelInfo>> {
        Ok(self
            .state()
            .channels
            .iter()
            .filter(|(_, c)| c.name.starts_with(prefix))
            .map(|(channel, c)| ChannelInfo {
                channel: *channel,
                name: c.name.clone(),
            })
            .collect())
    }

    async fn rename_channel(&self, channel: ChannelRef, name: &str) -> PlatformResult<()> {
        let mut state = self.state();
        let slot = state
            .channels
            .get_mut(&channel)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel}")))?;
        slot.name = name.to_string();
        Ok(())
    }

    async fn has_access(&self, channel: ChannelRef, user: UserId) -> PlatformResult<bool> {
        let state = self.state();
        let slot = state
            .channels
            .get(&channel)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel}")))?;
        Ok(slot.members.contains(&user))
    }

    async fn grant_access(&self, channel: ChannelRef, user: UserId) -> PlatformResult<()> {
        let mut state = self.state();
        let slot = state
            .channels
            .get_mut(&channel)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel}")))?;
        slot.members.insert(user);
        slot.grants += 1;
        Ok(())
    }

    async fn lookup_member(&self, user: UserId) -> PlatformResult<Option<Member>> {
        Ok(self.state().members.get(&user).cloned())
    }

    async fn post_message(&self, channel: ChannelRef, content: &str) -> PlatformResult<()> {
        self.push_message(channel, SERVICE_ACCOUNT, content)
            .map(|_| ())
    }

    async fn fetch_messages(
        &self,
        channel: ChannelRef,
        limit: usize,
    ) -> PlatformResult<Vec<ChannelMessage>> {
        let state = self.state();
        let slot = state
            .channels
            .get(&channel)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel}")))?;
        Ok(slot.messages.iter().rev().take(limit).cloned().collect())
    }
}
