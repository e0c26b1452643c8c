//! Handler for the `serve` command
//!
//! Runs the desk against the in-memory platform. Input is one JSON object
//! per line on stdin, tagged by `type`:
//!
//! ```text
//! {"type":"action","event_id":"…","actor":100,"roles":["staff"],"channel":1001,"action":"claim"}
//! {"type":"message","channel":1001,"author":100,"content":"<@400> please look"}
//! {"type":"member","id":400,"tag":"friend#0400"}
//! ```
//!
//! Responses and lifecycle events are written to stdout as JSON lines.
//! End of input or Ctrl-C shuts the desk down; deletions still waiting out
//! their grace period are picked up again by the next start.

use crate::ack::{Reply, ResponseSink, Visibility};
use crate::cli::OutputFormatter;
use crate::config::{AccessConfig, Config};
use crate::core::{ChannelRef, UserId};
use crate::error::{PlatformError, Result};
use crate::events::EventBus;
use crate::handlers::{EventHandler, RawEvent};
use crate::lifecycle::TicketLifecycle;
use crate::platform::{LocalPlatform, Member, PlatformResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use uuid::Uuid;

/// One line of console input
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ConsoleInput {
    Action(RawEvent),
    Message {
        channel: ChannelRef,
        author: UserId,
        #[serde(default)]
        content: String,
    },
    Member(Member),
}

/// Write one JSON line to stdout
fn emit(value: &serde_json::Value) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, value)?;
    writeln!(out)?;
    out.flush()
}

/// Responses for one event, written to stdout
struct ConsoleSink {
    event_id: Uuid,
}

impl ConsoleSink {
    fn send(&self, value: serde_json::Value) -> PlatformResult<()> {
        emit(&value).map_err(|e| PlatformError::Unavailable(format!("stdout: {e}")))
    }
}

#[async_trait]
impl ResponseSink for ConsoleSink {
    async fn reply(&self, reply: &Reply) -> PlatformResult<()> {
        self.send(json!({
            "type": "response",
            "event_id": self.event_id,
            "kind": "reply",
            "reply": reply,
        }))
    }

    async fn defer(&self, visibility: Visibility) -> PlatformResult<()> {
        self.send(json!({
            "type": "response",
            "event_id": self.event_id,
            "kind": "defer",
            "visibility": visibility,
        }))
    }

    async fn edit_reply(&self, reply: &Reply) -> PlatformResult<()> {
        self.send(json!({
            "type": "response",
            "event_id": self.event_id,
            "kind": "edit",
            "reply": reply,
        }))
    }
}

struct ServeContext {
    handler: Arc<EventHandler>,
    platform: Arc<LocalPlatform>,
    access: AccessConfig,
}

impl ServeContext {
    fn dispatch(&self, line: &str, tasks: &mut JoinSet<()>) {
        let input = match serde_json::from_str::<ConsoleInput>(line) {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed input line");
                let _ = emit(&json!({"type": "error", "error": e.to_string()}));
                return;
            },
        };

        match input {
            ConsoleInput::Action(raw) => {
                let event = raw.resolve(&self.access);
                let handler = Arc::clone(&self.handler);
                tasks.spawn(async move {
                    let sink = ConsoleSink {
                        event_id: event.event_id,
                    };
                    let state = handler.handle(event, &sink).await;
                    tracing::debug!(event_id = %sink.event_id, ?state, "event answered");
                });
            },
            ConsoleInput::Message {
                channel,
                author,
                content,
            } => match self.platform.push_message(channel, author, &content) {
                Ok(message) => {
                    let handler = Arc::clone(&self.handler);
                    tasks.spawn(async move {
                        handler.handle_message(&message).await;
                    });
                },
                Err(e) => {
                    let _ = emit(&json!({"type": "error", "error": e.to_string()}));
                },
            },
            ConsoleInput::Member(member) => {
                tracing::debug!(member = %member.id, tag = %member.tag, "member registered");
                self.platform.add_member(member);
            },
        }
    }
}

/// Handler for the `serve` command
///
/// # Errors
///
/// Returns an error if persisted state cannot be loaded or startup
/// reconciliation fails.
pub async fn handle_serve_command(config: &Config, output: &OutputFormatter) -> Result<()> {
    let platform = Arc::new(LocalPlatform::new());
    let events = EventBus::new();
    let desk = TicketLifecycle::open(config, platform.clone(), events.clone())?;

    for ticket in desk.registry().list() {
        if let Some(channel) = ticket.channel {
            platform.restore_channel(channel, &ticket.name, ticket.requester);
        }
    }
    desk.startup().await?;

    let mut receiver = events.subscribe();
    let forwarder = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let _ = emit(&json!({"type": "lifecycle", "payload": event}));
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "lifecycle event output fell behind");
                },
                Err(RecvError::Closed) => break,
            }
        }
    });

    let context = ServeContext {
        handler: Arc::new(EventHandler::new(Arc::clone(&desk), platform.clone(), config)),
        platform,
        access: config.access.clone(),
    };

    tracing::info!(data_dir = %config.storage.data_dir.display(), "serving events from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {},
                Ok(Some(line)) => context.dispatch(&line, &mut tasks),
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read stdin");
                    break;
                },
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "event task failed");
                }
            },
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "event task failed");
        }
    }

    let aborted = desk.shutdown();
    if aborted > 0 {
        output.warning(&format!(
            "{aborted} pending deletion(s) will resume on the next start"
        ));
    }
    forwarder.abort();
    tracing::info!("shut down");
    Ok(())
}
