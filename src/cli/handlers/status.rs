//! Handler for the `status` command
//!
//! Loads the registry from the data directory without touching the platform
//! and reports the persisted tickets.

use crate::cli::OutputFormatter;
use crate::config::Config;
use crate::core::{TicketRecord, TicketStatus};
use crate::error::Result;
use crate::registry::TicketRegistry;
use crate::storage::FileStorage;
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;

/// Handler for the `status` command
///
/// # Errors
///
/// Returns an error if persisted state cannot be read or the durable log is
/// corrupt.
pub fn handle_status_command(config: &Config, output: &OutputFormatter) -> Result<()> {
    let data = gather_status_data(config)?;

    if output.is_json() {
        output_json(&data, output)?;
    } else {
        output_text(&data, output);
    }

    Ok(())
}

struct StatusData {
    data_dir: PathBuf,
    last_issued: u64,
    log_seq: u64,
    tickets: Vec<TicketRecord>,
}

impl StatusData {
    fn count(&self, status: TicketStatus) -> usize {
        self.tickets.iter().filter(|t| t.status == status).count()
    }
}

fn gather_status_data(config: &Config) -> Result<StatusData> {
    let storage = FileStorage::new(&config.storage.data_dir);
    let registry =
        TicketRegistry::load_read_only(Arc::new(storage), &config.tickets.channel_prefix)?;

    Ok(StatusData {
        data_dir: config.storage.data_dir.clone(),
        last_issued: registry.last_issued(),
        log_seq: registry.log_seq(),
        tickets: registry.list(),
    })
}

fn output_json(data: &StatusData, output: &OutputFormatter) -> Result<()> {
    output.print_json(&serde_json::json!({
        "data_dir": data.data_dir,
        "last_issued": data.last_issued,
        "log_seq": data.log_seq,
        "counts": {
            "open": data.count(TicketStatus::Open),
            "claimed": data.count(TicketStatus::Claimed),
            "closing": data.count(TicketStatus::Closing),
        },
        "tickets": data.tickets,
    }))
}

fn output_text(data: &StatusData, output: &OutputFormatter) {
    output.info(&format!("Data directory: {}", data.data_dir.display()));
    output.info(&format!("Last issued ticket: {}", data.last_issued));
    output.info(&format!("Log sequence: {}", data.log_seq));
    output.info("");

    if data.tickets.is_empty() {
        output.info("No active tickets");
        return;
    }

    output.heading(&format!(
        "Tickets ({} open, {} claimed, {} closing)",
        data.count(TicketStatus::Open),
        data.count(TicketStatus::Claimed),
        data.count(TicketStatus::Closing),
    ));
    for ticket in &data.tickets {
        let claimed = ticket
            .claimed_by
            .map(|user| format!(" claimed by {user}"))
            .unwrap_or_default();
        output.info(&format!(
            "  {:<16} {:<8} requester {}{} ({})",
            ticket.name,
            output.status(ticket.status),
            ticket.requester,
            claimed,
            ticket
                .created_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M"),
        ));
    }
}
