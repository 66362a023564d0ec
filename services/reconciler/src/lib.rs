//! Reconciler Service
//!
//! Background consumer that moves accepted votes from the durable event log
//! into the system-of-record store with at-least-once delivery and
//! idempotent writes.

pub mod backoff;
pub mod config;
pub mod consumer;

pub use config::{consumer_name, ReconcilerConfig};
pub use consumer::{EntryOutcome, ReconcileError, Reconciler, ReconcilerStats, RoundReport};
