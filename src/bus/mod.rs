//! Inter-agent message bus.
//!
//! - `Message`: typed, prioritized envelope with optional TTL and ack flag
//! - `MessageBus`: per-agent FIFO mailboxes with broadcast and ack tracking

mod bus;
mod message;

pub use bus::{BusStats, MessageBus, SweepReport};
pub use message::{Message, MessagePriority, MessageType};
