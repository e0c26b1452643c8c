//! Acknowledgment protocol for inbound events
//!
//! The platform expects exactly one terminal response per event, within a
//! deadline:
//!
//! - an immediate reply, or
//! - a deferral followed later by exactly one finalize, or
//! - an explicit decision not to respond, taken before anything was sent.
//!
//! [`Acknowledger`] tracks which of these has happened and refuses anything
//! that would break the rule. Handlers end every event with
//! [`Acknowledger::conclude`], which turns success or failure into the one
//! terminal response.

use crate::config::ProtocolConfig;
use crate::error::{DeskError, ProtocolViolation, Result};
use crate::platform::PlatformResult;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Who can see a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Only the actor
    Private,
    /// Everyone in the channel
    Public,
}

/// A file attached to a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub file_name: String,
    pub body: String,
}

/// Content of a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub content: String,
    pub visibility: Visibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
}

impl Reply {
    pub fn private(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            visibility: Visibility::Private,
            artifact: None,
        }
    }

    pub fn public(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            visibility: Visibility::Public,
            artifact: None,
        }
    }

    #[must_use]
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }
}

/// What a handler decided to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(Reply),
    /// Deliberately leave the event unanswered
    Silent,
}

/// Platform side of the response protocol
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Immediate response
    async fn reply(&self, reply: &Reply) -> PlatformResult<()>;

    /// Placeholder accepted now, content later
    async fn defer(&self, visibility: Visibility) -> PlatformResult<()>;

    /// Content for a deferred response
    async fn edit_reply(&self, reply: &Reply) -> PlatformResult<()>;
}

/// Where an event is in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Pending,
    Replied,
    Deferred { at: Instant },
    Finalized,
    Declined,
}

impl AckState {
    /// An immediate reply or a deferral has been issued
    #[must_use]
    pub const fn is_acknowledged(self) -> bool {
        !matches!(self, Self::Pending | Self::Declined)
    }

    /// A deferred response has received its content
    #[must_use]
    pub const fn is_finalized(self) -> bool {
        matches!(self, Self::Finalized)
    }

    /// No further response may be sent
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Replied | Self::Finalized | Self::Declined)
    }
}

/// Per-event response window
pub struct Acknowledger<'a> {
    sink: &'a dyn ResponseSink,
    state: AckState,
    received_at: Instant,
    initial_deadline: Duration,
    finalize_deadline: Duration,
}

impl<'a> Acknowledger<'a> {
    /// Open the window for an event received just now
    pub fn new(sink: &'a dyn ResponseSink, protocol: &ProtocolConfig) -> Self {
        Self::received_at(sink, protocol, Instant::now())
    }

    /// Open the window for an event received at `received_at`
    pub fn received_at(
        sink: &'a dyn ResponseSink,
        protocol: &ProtocolConfig,
        received_at: Instant,
    ) -> Self {
        Self {
            sink,
            state: AckState::Pending,
            received_at,
            initial_deadline: protocol.initial_deadline(),
            finalize_deadline: protocol.finalize_deadline(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> AckState {
        self.state
    }

    #[must_use]
    pub const fn is_acknowledged(&self) -> bool {
        self.state.is_acknowledged()
    }

    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.state.is_finalized()
    }

    fn ensure_pending(&self) -> Result<()> {
        match self.state {
            AckState::Pending => {},
            AckState::Declined => return Err(ProtocolViolation::Declined.into()),
            _ => return Err(ProtocolViolation::AlreadyAcknowledged.into()),
        }
        if self.received_at.elapsed() > self.initial_deadline {
            return Err(ProtocolViolation::InitialDeadlineMissed.into());
        }
        Ok(())
    }

    /// Respond now; the response is final
    pub async fn acknowledge_immediate(&mut self, reply: &Reply) -> Result<()> {
        self.ensure_pending()?;
        self.sink.reply(reply).await?;
        self.state = AckState::Replied;
        Ok(())
    }

    /// Accept the event now and promise content later
    pub async fn acknowledge_deferred(&mut self, visibility: Visibility) -> Result<()> {
        self.ensure_pending()?;
        self.sink.defer(visibility).await?;
        self.state = AckState::Deferred { at: Instant::now() };
        Ok(())
    }

    /// Deliver the content of a deferred response
    pub async fn finalize(&mut self, reply: &Reply) -> Result<()> {
        match self.state {
            AckState::Deferred { at } => {
                if at.elapsed() > self.finalize_deadline {
                    return Err(ProtocolViolation::FinalizeWindowClosed.into());
                }
                self.sink.edit_reply(reply).await?;
                self.state = AckState::Finalized;
                Ok(())
            },
            AckState::Finalized => Err(ProtocolViolation::AlreadyFinalized.into()),
            AckState::Declined => Err(ProtocolViolation::Declined.into()),
            AckState::Pending | AckState::Replied => Err(ProtocolViolation::NotDeferred.into()),
        }
    }

    /// Decide not to respond at all
    pub fn decline(&mut self) -> Result<()> {
        match self.state {
            AckState::Pending => {
                self.state = AckState::Declined;
                Ok(())
            },
            AckState::Declined => Err(ProtocolViolation::Declined.into()),
            _ => Err(ProtocolViolation::AlreadyAcknowledged.into()),
        }
    }

    /// Send `reply` through whichever mode is still open
    async fn deliver(&mut self, reply: &Reply) -> Result<()> {
        match self.state {
            AckState::Deferred { .. } => self.finalize(reply).await,
            _ => self.acknowledge_immediate(reply).await,
        }
    }

    /// Turn a handler's result into the event's single terminal response
    ///
    /// Failures are reported with a private fallback message describing
    /// `action` (e.g. "creating the ticket"). If even that cannot be sent,
    /// the failure is logged and dropped: there is nowhere left to report it.
    pub async fn conclude(mut self, outcome: Result<Outcome>, action: &str) -> AckState {
        let primary = match outcome {
            Ok(Outcome::Reply(reply)) => match self.deliver(&reply).await {
                Ok(()) => return self.state,
                Err(e) => e,
            },
            Ok(Outcome::Silent) => match self.state {
                AckState::Pending => {
                    self.state = AckState::Declined;
                    return self.state;
                },
                AckState::Deferred { .. } => {
                    tracing::warn!(action, "deferred event concluded without content");
                    ProtocolViolation::NotDeferred.into()
                },
                _ => return self.state,
            },
            Err(e) => e,
        };

        self.report_failure(&primary, action).await;
        self.state
    }

    async fn report_failure(&mut self, error: &DeskError, action: &str) {
        if error.is_user_facing() {
            tracing::debug!(%error, action, "request rejected");
        } else {
            tracing::error!(%error, action, "request failed");
        }

        if self.state.is_terminal() {
            return;
        }

        let fallback = Reply::private(error.user_message(action));
        if let Err(secondary) = self.deliver(&fallback).await {
            tracing::error!(
                error = %secondary,
                action,
                "failed to deliver fallback response"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PlatformError, StateConflict};
    use crate::test_utils::{RecordedResponse, RecordingSink};

    fn protocol() -> ProtocolConfig {
        ProtocolConfig::default()
    }

    #[tokio::test]
    async fn test_immediate_reply_only_once() {
        let sink = RecordingSink::new();
        let mut ack = Acknowledger::new(&sink, &protocol());

        ack.acknowledge_immediate(&Reply::public("hi")).await.unwrap();
        let err = ack
            .acknowledge_immediate(&Reply::public("again"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeskError::Protocol(ProtocolViolation::AlreadyAcknowledged)
        ));
        assert_eq!(sink.responses().len(), 1);
    }

    #[tokio::test]
    async fn test_defer_then_finalize_once() {
        let sink = RecordingSink::new();
        let mut ack = Acknowledger::new(&sink, &protocol());

        assert!(ack.acknowledge_deferred(Visibility::Private).await.is_ok());
        assert!(ack.is_acknowledged());
        assert!(
            ack.acknowledge_immediate(&Reply::private("x"))
                .await
                .is_err()
        );

        ack.finalize(&Reply::private("done")).await.unwrap();
        assert!(ack.is_finalized());

        let err = ack.finalize(&Reply::private("twice")).await.unwrap_err();
        assert!(matches!(
            err,
            DeskError::Protocol(ProtocolViolation::AlreadyFinalized)
        ));
        assert_eq!(
            sink.responses(),
            vec![
                RecordedResponse::Deferred(Visibility::Private),
                RecordedResponse::Edited(Reply::private("done")),
            ]
        );
    }

    #[tokio::test]
    async fn test_finalize_without_defer_fails() {
        let sink = RecordingSink::new();
        let mut ack = Acknowledger::new(&sink, &protocol());

        let err = ack.finalize(&Reply::private("x")).await.unwrap_err();
        assert!(matches!(
            err,
            DeskError::Protocol(ProtocolViolation::NotDeferred)
        ));
        assert!(sink.responses().is_empty());
    }

    #[tokio::test]
    async fn test_decline_blocks_later_responses() {
        let sink = RecordingSink::new();
        let mut ack = Acknowledger::new(&sink, &protocol());

        ack.decline().unwrap();
        assert!(ack.acknowledge_immediate(&Reply::private("x")).await.is_err());
        assert!(ack.acknowledge_deferred(Visibility::Public).await.is_err());
        assert!(sink.responses().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_deadline() {
        let sink = RecordingSink::new();
        let mut ack = Acknowledger::new(&sink, &protocol());

        tokio::time::advance(Duration::from_secs(4)).await;
        let err = ack
            .acknowledge_deferred(Visibility::Private)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeskError::Protocol(ProtocolViolation::InitialDeadlineMissed)
        ));
        assert!(sink.responses().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_window_closes() {
        let sink = RecordingSink::new();
        let mut ack = Acknowledger::new(&sink, &protocol());
        ack.acknowledge_deferred(Visibility::Private).await.unwrap();

        tokio::time::advance(Duration::from_secs(16 * 60)).await;
        let err = ack.finalize(&Reply::private("late")).await.unwrap_err();
        assert!(matches!(
            err,
            DeskError::Protocol(ProtocolViolation::FinalizeWindowClosed)
        ));
    }

    #[tokio::test]
    async fn test_conclude_error_before_ack_replies_privately() {
        let sink = RecordingSink::new();
        let ack = Acknowledger::new(&sink, &protocol());

        let state = ack
            .conclude(
                Err(StateConflict::AlreadyClaimed.into()),
                "claiming the ticket",
            )
            .await;

        assert_eq!(state, AckState::Replied);
        assert_eq!(
            sink.responses(),
            vec![RecordedResponse::Replied(Reply::private(
                "This ticket has already been claimed!"
            ))]
        );
    }

    #[tokio::test]
    async fn test_conclude_error_after_defer_finalizes_with_generic_message() {
        let sink = RecordingSink::new();
        let mut ack = Acknowledger::new(&sink, &protocol());
        ack.acknowledge_deferred(Visibility::Private).await.unwrap();

        let state = ack
            .conclude(
                Err(PlatformError::Unavailable("down".into()).into()),
                "creating the ticket",
            )
            .await;

        assert_eq!(state, AckState::Finalized);
        assert_eq!(
            sink.responses().last(),
            Some(&RecordedResponse::Edited(Reply::private(
                "An error occurred while creating the ticket."
            )))
        );
    }

    #[tokio::test]
    async fn test_fallback_failure_is_swallowed() {
        let sink = RecordingSink::failing();
        let ack = Acknowledger::new(&sink, &protocol());

        let state = ack
            .conclude(Ok(Outcome::Reply(Reply::public("ok"))), "claiming the ticket")
            .await;

        assert_eq!(state, AckState::Pending);
        assert!(sink.responses().is_empty());
    }

    #[tokio::test]
    async fn test_conclude_silent_declines() {
        let sink = RecordingSink::new();
        let ack = Acknowledger::new(&sink, &protocol());

        let state = ack.conclude(Ok(Outcome::Silent), "handling the event").await;
        assert_eq!(state, AckState::Declined);
        assert!(sink.responses().is_empty());
    }
}
