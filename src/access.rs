//! Passive member access grants
//!
//! Mentioning someone inside an open ticket brings them into it. The watcher
//! sees every message delivered to the service, ignores anything outside an
//! open or claimed ticket, and grants each mentioned human access exactly
//! once.

use crate::core::{TicketStatus, UserId};
use crate::error::Result;
use crate::lifecycle::{GrantOutcome, TicketLifecycle};
use crate::platform::ChannelMessage;
use std::sync::Arc;

/// Grants ticket access to users mentioned in ticket channels
#[derive(Debug, Clone)]
pub struct MemberAccessWatcher {
    desk: Arc<TicketLifecycle>,
}

impl MemberAccessWatcher {
    #[must_use]
    pub const fn new(desk: Arc<TicketLifecycle>) -> Self {
        Self { desk }
    }

    /// Inspect one message; returns the members that were newly granted
    pub async fn observe(&self, message: &ChannelMessage) -> Result<Vec<UserId>> {
        if message.author_is_bot {
            return Ok(Vec::new());
        }
        let Some(ticket) = self.desk.registry().by_channel(message.channel) else {
            return Ok(Vec::new());
        };
        if !matches!(ticket.status, TicketStatus::Open | TicketStatus::Claimed) {
            tracing::debug!(
                ticket = %ticket.key,
                status = %ticket.status,
                "ignoring message in inactive ticket"
            );
            return Ok(Vec::new());
        }

        let mut granted = Vec::new();
        for user in message.mentioned_users() {
            if user == message.author {
                continue;
            }
            match self.desk.platform().lookup_member(user).await {
                Ok(Some(member)) if !member.is_bot => {},
                Ok(Some(_)) => continue,
                Ok(None) => {
                    tracing::debug!(ticket = %ticket.key, %user, "mentioned user is not a member");
                    continue;
                },
                Err(e) => {
                    tracing::warn!(ticket = %ticket.key, %user, error = %e, "member lookup failed");
                    continue;
                },
            }

            match self.desk.grant_once(&ticket.key, user, message.author).await {
                Ok(GrantOutcome::Granted) => granted.push(user),
                Ok(GrantOutcome::AlreadyPresent) => {},
                Err(e) if e.is_user_facing() => {
                    tracing::debug!(ticket = %ticket.key, %user, error = %e, "skipping grant");
                    break;
                },
                Err(e) => return Err(e),
            }
        }
        Ok(granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CapabilitySet;
    use crate::test_utils::{REQUESTER, TestDesk};

    #[tokio::test]
    async fn test_mention_grants_access_once() {
        let fixture = TestDesk::new();
        let record = fixture.open_ticket(REQUESTER).await;
        let channel = record.channel.unwrap();
        let friend = fixture.member(400, "friend#0400");
        let watcher = MemberAccessWatcher::new(fixture.desk.clone());

        let text = format!("hey {} can you look?", friend.mention());
        let first = fixture.platform.push_message(channel, REQUESTER, &text).unwrap();
        let second = fixture.platform.push_message(channel, REQUESTER, &text).unwrap();

        assert_eq!(watcher.observe(&first).await.unwrap(), vec![friend]);
        assert!(watcher.observe(&second).await.unwrap().is_empty());
        assert_eq!(fixture.platform.grant_count(channel), 1);
    }

    #[tokio::test]
    async fn test_concurrent_mentions_grant_once() {
        let fixture = TestDesk::new();
        let record = fixture.open_ticket(REQUESTER).await;
        let channel = record.channel.unwrap();
        let friend = fixture.member(400, "friend#0400");
        let watcher = MemberAccessWatcher::new(fixture.desk.clone());

        let text = format!("{} please", friend.mention());
        let message = fixture.platform.push_message(channel, REQUESTER, &text).unwrap();

        let (a, b) = tokio::join!(watcher.observe(&message), watcher.observe(&message));
        assert_eq!(a.unwrap().len() + b.unwrap().len(), 1);
        assert_eq!(fixture.platform.grant_count(channel), 1);
        let added = fixture
            .platform
            .notices(channel)
            .iter()
            .filter(|n| n.contains("has been added"))
            .count();
        assert_eq!(added, 1);
    }

    #[tokio::test]
    async fn test_bots_are_neither_granted_nor_heard() {
        let fixture = TestDesk::new();
        let record = fixture.open_ticket(REQUESTER).await;
        let channel = record.channel.unwrap();
        let bot = fixture.bot(500);
        let friend = fixture.member(400, "friend#0400");
        let watcher = MemberAccessWatcher::new(fixture.desk.clone());

        let mention_bot = fixture
            .platform
            .push_message(channel, REQUESTER, &bot.mention())
            .unwrap();
        assert!(watcher.observe(&mention_bot).await.unwrap().is_empty());

        let from_bot = fixture
            .platform
            .push_message(channel, bot, &friend.mention())
            .unwrap();
        assert!(watcher.observe(&from_bot).await.unwrap().is_empty());
        assert_eq!(fixture.platform.grant_count(channel), 0);
    }

    #[tokio::test]
    async fn test_closing_ticket_is_ignored() {
        let fixture = TestDesk::new();
        let record = fixture.open_ticket(REQUESTER).await;
        let channel = record.channel.unwrap();
        let friend = fixture.member(400, "friend#0400");
        let watcher = MemberAccessWatcher::new(fixture.desk.clone());
        fixture
            .desk
            .close(&record.key, REQUESTER, &CapabilitySet::new())
            .await
            .unwrap();

        let message = fixture
            .platform
            .push_message(channel, REQUESTER, &friend.mention())
            .unwrap();
        assert!(watcher.observe(&message).await.unwrap().is_empty());
        assert_eq!(fixture.platform.grant_count(channel), 0);
    }

    #[tokio::test]
    async fn test_non_ticket_channel_is_ignored() {
        let fixture = TestDesk::new();
        let general = fixture.platform.insert_channel("general");
        let friend = fixture.member(400, "friend#0400");
        let watcher = MemberAccessWatcher::new(fixture.desk.clone());

        let message = fixture
            .platform
            .push_message(general, REQUESTER, &friend.mention())
            .unwrap();
        assert!(watcher.observe(&message).await.unwrap().is_empty());
    }
}
