//! Local incremental ticket cache.
//!
//! Tickets are pulled from RT by the sync job and stored one file per ticket,
//! so analytics can run over the whole queue without touching the network.
//! The checkpoint records the start time of the last completed sync; the next
//! sync only asks RT for tickets updated after it.

pub mod checkpoint;
mod storage;

pub use storage::{CacheError, TicketCache};
