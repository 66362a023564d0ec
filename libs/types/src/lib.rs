//! Types library for the vote ingestion pipeline
//!
//! This library provides the core type definitions shared by the publisher,
//! the durable log, the reconciler and the gateway.
//!
//! # Modules
//! - `ids`: Unique identifiers (CandidateId, VoteId)
//! - `vote`: Candidate, VoteEvent, TimeBucket and the log field record
//! - `clock`: Time source abstraction
//! - `errors`: Error taxonomy

pub mod clock;
pub mod errors;
pub mod ids;
pub mod vote;
