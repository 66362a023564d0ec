//! Durable Event Log contract
//!
//! An ordered, append-only log of named streams with consumer groups.
//! A consumer group shares one delivery cursor and a ledger of pending
//! entries (delivered, not yet acknowledged). Delivery is at-least-once per
//! group: an entry leaves the ledger only through [`EventLog::ack`], and
//! [`EventLog::claim`] is the only way to move it between consumers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vote_types::vote::Fields;

use crate::journal::JournalError;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("No such consumer group {group} on stream {stream}")]
    NoGroup { stream: String, group: String },

    #[error("Log unavailable: {0}")]
    Unavailable(String),
}

// ── Entry Ids ───────────────────────────────────────────────────────

/// Position of an entry in a stream: `<millis>-<seq>`.
///
/// Ids are strictly increasing within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct EntryId {
    pub millis: u64,
    pub seq: u64,
}

impl EntryId {
    pub const ZERO: EntryId = EntryId { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Smallest id strictly greater than `last` at time `now_millis`.
    pub fn next_after(last: EntryId, now_millis: u64) -> Self {
        if now_millis > last.millis {
            Self::new(now_millis, 0)
        } else {
            Self::new(last.millis, last.seq + 1)
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (millis, seq) = s
            .split_once('-')
            .ok_or_else(|| format!("entry id {s:?} is not <millis>-<seq>"))?;
        Ok(Self {
            millis: millis.parse().map_err(|e| format!("{s:?}: {e}"))?,
            seq: seq.parse().map_err(|e| format!("{s:?}: {e}"))?,
        })
    }
}

// ── Entries ─────────────────────────────────────────────────────────

/// An entry as delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: Fields,
}

/// A delivered-but-unacknowledged entry in a group's ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: EntryId,
    /// Consumer currently owning the entry.
    pub consumer: String,
    /// How many times the entry has been delivered or claimed.
    pub delivery_count: u64,
    /// Time since the last delivery.
    pub idle: Duration,
}

/// Page selector for [`EventLog::list_pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRange {
    /// Only entries with an id strictly greater than this.
    pub after: Option<EntryId>,
    pub count: usize,
    /// Only entries owned by this consumer.
    pub consumer: Option<String>,
}

impl PendingRange {
    /// First `count` pending entries of the group.
    pub fn first(count: usize) -> Self {
        Self {
            after: None,
            count,
            consumer: None,
        }
    }

    pub fn after(mut self, id: EntryId) -> Self {
        self.after = Some(id);
        self
    }
}

/// Aggregate view of a group's ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSummary {
    pub count: u64,
    pub lowest: Option<EntryId>,
    pub highest: Option<EntryId>,
    pub per_consumer: BTreeMap<String, u64>,
}

// ── Log Contract ────────────────────────────────────────────────────

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Create `group` on `stream` reading from the beginning, creating the
    /// stream if needed. Returns `false` if the group already existed.
    async fn create_group(&self, stream: &str, group: &str) -> Result<bool, LogError>;

    /// Append an entry and return its id.
    async fn append(&self, stream: &str, fields: Fields) -> Result<EntryId, LogError>;

    /// Deliver up to `count` entries never before delivered to `group`,
    /// recording them as pending for `consumer`. With `block`, waits up to
    /// that long for an append when nothing is available.
    async fn read_group_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, LogError>;

    /// Pending entries of `group` in id order.
    async fn list_pending(
        &self,
        stream: &str,
        group: &str,
        range: PendingRange,
    ) -> Result<Vec<PendingEntry>, LogError>;

    /// Reassign the listed pending entries idle for at least `min_idle` to
    /// `consumer`. Entries not pending or not idle long enough are skipped.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        ids: &[EntryId],
        min_idle: Duration,
    ) -> Result<Vec<StreamEntry>, LogError>;

    /// Remove entries from the group's ledger. Returns how many were pending;
    /// unknown or already acknowledged ids are ignored.
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, LogError>;

    async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary, LogError>;

    /// Up to `count` entries with ids strictly after `after`, in id order.
    /// Reads the stream itself; no group cursor or ledger changes.
    async fn range(
        &self,
        stream: &str,
        after: Option<EntryId>,
        count: usize,
    ) -> Result<Vec<StreamEntry>, LogError>;

    /// Number of entries in the stream (0 if it does not exist).
    async fn len(&self, stream: &str) -> Result<u64, LogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_after_uses_clock_when_it_advances() {
        assert_eq!(EntryId::next_after(EntryId::new(5, 3), 9), EntryId::new(9, 0));
    }

    #[test]
    fn test_next_after_bumps_seq_when_clock_stalls_or_rewinds() {
        assert_eq!(EntryId::next_after(EntryId::new(5, 3), 5), EntryId::new(5, 4));
        assert_eq!(EntryId::next_after(EntryId::new(5, 3), 1), EntryId::new(5, 4));
        assert_eq!(EntryId::next_after(EntryId::ZERO, 0), EntryId::new(0, 1));
    }

    #[test]
    fn test_entry_id_text_form() {
        let id = EntryId::new(1_766_061_296_000, 2);
        assert_eq!(id.to_string(), "1766061296000-2");
        assert_eq!(id.to_string().parse::<EntryId>().unwrap(), id);
        assert!("12".parse::<EntryId>().is_err());
        assert!("a-b".parse::<EntryId>().is_err());
    }

    #[test]
    fn test_entry_ids_order_by_time_then_seq() {
        assert!(EntryId::new(1, 9) < EntryId::new(2, 0));
        assert!(EntryId::new(2, 0) < EntryId::new(2, 1));
    }
}
