//! Plain-text export of a ticket channel's history

use crate::ack::Artifact;
use crate::core::ChannelRef;
use crate::error::Result;
use crate::platform::{ChannelMessage, Platform};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::sync::Arc;

/// Most messages a single transcript will ever fetch
pub const MAX_TRANSCRIPT_MESSAGES: usize = 100;

/// Fetches recent channel history and renders it oldest-first
#[derive(Clone)]
pub struct TranscriptGenerator {
    platform: Arc<dyn Platform>,
    limit: usize,
}

impl std::fmt::Debug for TranscriptGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptGenerator")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl TranscriptGenerator {
    /// `limit` is capped at [`MAX_TRANSCRIPT_MESSAGES`]
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>, limit: usize) -> Self {
        Self {
            platform,
            limit: limit.min(MAX_TRANSCRIPT_MESSAGES),
        }
    }

    /// Build the transcript file for `channel`, titled with `channel_name`
    pub async fn generate(&self, channel: ChannelRef, channel_name: &str) -> Result<Artifact> {
        let messages = self.platform.fetch_messages(channel, self.limit).await?;
        tracing::debug!(%channel, count = messages.len(), "rendering transcript");

        Ok(Artifact {
            file_name: format!("transcript-{channel_name}.txt"),
            body: render(channel_name, messages, Utc::now()),
        })
    }
}

/// Render messages in chronological order regardless of input order
#[must_use]
pub fn render(channel_name: &str, mut messages: Vec<ChannelMessage>, now: DateTime<Utc>) -> String {
    messages.sort_by_key(|m| (m.created_at, m.id));

    let mut out = String::new();
    let _ = writeln!(out, "# Transcript for {channel_name}");
    let _ = writeln!(out, "Created at: {}", now.to_rfc3339());
    out.push('\n');

    for message in &messages {
        let _ = writeln!(
            out,
            "## {} ({})",
            message.author_tag,
            message.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if message.content.is_empty() {
            out.push_str("(no text content)");
        } else {
            out.push_str(&message.content);
        }
        if message.embeds > 0 {
            out.push_str("\n[Embedded content]");
        }
        if message.attachments > 0 {
            out.push_str("\n[Attachments]");
        }
        out.push_str("\n\n");
    }
    out
}
