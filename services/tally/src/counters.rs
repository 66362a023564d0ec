//! Aggregate Counter Store
//!
//! Running vote count per candidate. Counts are only ever added to by the
//! publisher, one accepted submission at a time, so every counter is
//! monotonically non-decreasing between rebuilds.
//!
//! Each counter is an `AtomicU64` inside a `DashMap` shard: increments for
//! an existing candidate take a shard read lock plus one `fetch_add`, and
//! only the first vote for a candidate takes the shard write lock.
//!
//! On startup the counters are rebuilt from the event log, which holds every
//! accepted submission whether or not it has been reconciled yet.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use persistence::stream::{EntryId, EventLog, LogError};
use tracing::{info, warn};
use vote_types::ids::CandidateId;
use vote_types::vote::VoteEvent;

/// Entries read per page while rebuilding from the log.
const REBUILD_PAGE: usize = 1_000;

#[derive(Debug, Default)]
pub struct AggregateCounters {
    counts: DashMap<CandidateId, AtomicU64>,
}

impl AggregateCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one vote for `candidate_id`, returning the new count.
    pub fn increment(&self, candidate_id: CandidateId) -> u64 {
        if let Some(counter) = self.counts.get(&candidate_id) {
            return counter.fetch_add(1, Ordering::SeqCst) + 1;
        }
        self.counts
            .entry(candidate_id)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    pub fn get(&self, candidate_id: CandidateId) -> u64 {
        self.counts
            .get(&candidate_id)
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot_all(&self) -> BTreeMap<CandidateId, u64> {
        self.counts
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::SeqCst)))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.counts
            .iter()
            .map(|entry| entry.value().load(Ordering::SeqCst))
            .sum()
    }

    /// Replace all counters. Meant for recovery before the publisher serves
    /// traffic; increments racing a rebuild may be lost.
    pub fn rebuild_from(&self, counts: BTreeMap<CandidateId, u64>) {
        self.counts.clear();
        for (candidate_id, count) in counts {
            self.counts.insert(candidate_id, AtomicU64::new(count));
        }
    }

    /// Rebuild from a full scan of `stream`, one count per accepted entry.
    ///
    /// Entries without a readable candidate id are skipped; the reconciler
    /// will never store them either. Returns the rebuilt total.
    pub async fn rebuild_from_log(&self, log: &dyn EventLog, stream: &str) -> Result<u64, LogError> {
        let mut counts: BTreeMap<CandidateId, u64> = BTreeMap::new();
        let mut after: Option<EntryId> = None;
        let mut skipped = 0u64;
        loop {
            let page = log.range(stream, after, REBUILD_PAGE).await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.id);
            for entry in &page {
                match VoteEvent::from_fields(&entry.fields) {
                    Ok(vote) => *counts.entry(vote.candidate_id).or_insert(0) += 1,
                    Err(e) => {
                        skipped += 1;
                        warn!(entry_id = %entry.id, error = %e, "Unparseable entry left out of counters");
                    }
                }
            }
            if page.len() < REBUILD_PAGE {
                break;
            }
        }

        let candidates = counts.len();
        self.rebuild_from(counts);
        let total = self.total();
        info!(stream, candidates, total, skipped, "Aggregate counters rebuilt from log");
        Ok(total)
    }
}
