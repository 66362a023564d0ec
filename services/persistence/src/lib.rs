//! Persistence Service
//!
//! Durable storage for the vote pipeline, all built on one append-only,
//! checksummed journal format:
//!
//! - `journal` / `reader`: segment writer and crash-tolerant replay
//! - `stream` / `log`: the Durable Event Log (streams, consumer groups,
//!   pending ledgers, claim and ack)
//! - `store`: the System-of-Record Store, keyed by candidate and vote id
//! - `candidates`: durable list of registered candidates

pub mod candidates;
mod group;
pub mod journal;
pub mod log;
pub mod reader;
pub mod store;
pub mod stream;

pub use log::JournaledLog;
pub use store::{JournaledVoteStore, MemoryVoteStore, StoreError, VoteStore};
pub use stream::{EntryId, EventLog, LogError, PendingEntry, PendingRange, StreamEntry};
