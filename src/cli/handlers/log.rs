//! Handler for the `log` command

use crate::cli::OutputFormatter;
use crate::config::Config;
use crate::error::Result;
use crate::storage::{FileStorage, LogEntry, LogRecord, TicketLog};

/// Print the last `limit` records of the durable log, oldest first
///
/// # Errors
///
/// Returns an error if the log cannot be read or is corrupt.
pub fn handle_log_command(config: &Config, limit: usize, output: &OutputFormatter) -> Result<()> {
    let storage = FileStorage::new(&config.storage.data_dir);
    let records = storage.read_all()?;
    let skip = records.len().saturating_sub(limit);
    let recent = &records[skip..];

    if output.is_json() {
        return output.print_json(&recent);
    }

    if recent.is_empty() {
        output.info("The ticket log is empty");
        return Ok(());
    }
    for record in recent {
        output.info(&format_record(record));
    }
    Ok(())
}

fn format_record(record: &LogRecord) -> String {
    let detail = match &record.entry {
        LogEntry::Insert {
            key,
            requester,
            channel,
            ..
        } => format!("{key} requester={requester} channel={channel}"),
        LogEntry::Claim { claimed_by, .. } => format!("by={claimed_by}"),
        LogEntry::Rename { name, .. } => format!("name={name}"),
        LogEntry::Close { closed_by, .. } => format!("by={closed_by}"),
        LogEntry::Delete { reason, .. } => format!("reason={reason:?}"),
    };
    format!(
        "{:>6} {} {:<6} {} {detail}",
        record.seq,
        record.at.format("%Y-%m-%d %H:%M:%S"),
        record.entry.op(),
        record.entry.ticket_id(),
    )
}
