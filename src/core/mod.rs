//! Core domain types

mod capability;
mod ticket;

pub use capability::{Capability, CapabilitySet};
pub use ticket::{ChannelRef, TicketId, TicketKey, TicketRecord, TicketStatus, UserId};
