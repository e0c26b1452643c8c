//! Terminal output for the CLI
//!
//! Human output is colored unless disabled; `--json` switches every command
//! to machine-readable output on stdout.

use crate::error::{Result, StorageError};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

/// Formats command results for the terminal
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    json: bool,
    no_color: bool,
}

impl OutputFormatter {
    #[must_use]
    pub fn new(json: bool, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { json, no_color }
    }

    #[must_use]
    pub const fn is_json(&self) -> bool {
        self.json
    }

    #[must_use]
    pub const fn is_colored(&self) -> bool {
        !self.no_color
    }

    pub fn success(&self, message: &str) {
        if !self.json {
            println!("{} {message}", "✓".green().bold());
        }
    }

    pub fn info(&self, message: &str) {
        if !self.json {
            println!("{message}");
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.json {
            eprintln!("{} {message}", "warning:".yellow().bold());
        }
    }

    /// Errors always go to stderr, in JSON mode too
    pub fn error(&self, message: &str) {
        eprintln!("{} {message}", "error:".red().bold());
    }

    /// Print `value` as pretty JSON on stdout
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string_pretty(value)
            .map_err(|e| StorageError::json(Path::new("<stdout>"), e))?;
        println!("{text}");
        Ok(())
    }

    /// Heading for a section of human output
    pub fn heading(&self, title: &str) {
        if !self.json {
            println!("{}", title.bold().underline());
        }
    }

    /// Colored rendering of a status word
    #[must_use]
    pub fn status(&self, status: crate::core::TicketStatus) -> String {
        use crate::core::TicketStatus;
        let text = status.to_string();
        match status {
            TicketStatus::Open => text.green().to_string(),
            TicketStatus::Claimed => text.cyan().to_string(),
            TicketStatus::Closing => text.yellow().to_string(),
            TicketStatus::Deleted => text.dimmed().to_string(),
        }
    }
}
