//! Outbound command path
//!
//! Commands are queued by callers, written by one sequential worker, and
//! their acks are handed back through the response table.

mod correlation;
mod dispatcher;

pub use correlation::{
    Awaited, CommandResponse, CorrelationKey, PendingCommand, ResponseTable, MAX_KEY_LEN,
};
pub use dispatcher::{Dispatcher, QueuedCommand};
