//! Tally Service
//!
//! Hot path of the vote pipeline: accepts submissions, keeps live per-candidate
//! counts and pushes a full totals snapshot to every live subscriber after each
//! accepted vote.
//!
//! - `publisher`: append → increment → broadcast
//! - `counters`: lock-free per-candidate counters
//! - `registry`: candidates and their display names
//! - `broadcast`: named fan-out channels and the per-connection relay

pub mod broadcast;
pub mod counters;
pub mod publisher;
pub mod registry;

pub use broadcast::{relay, BroadcastHub, RelayEnd, Subscription};
pub use counters::AggregateCounters;
pub use publisher::{PublisherConfig, VotePublisher};
pub use registry::{CandidateRegistry, RegistryError};
