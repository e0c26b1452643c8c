//! Command handlers for the CLI

mod log;
mod serve;
mod status;

pub use log::handle_log_command;
pub use serve::handle_serve_command;
pub use status::handle_status_command;
