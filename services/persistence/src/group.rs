//! Stream and consumer-group bookkeeping
//!
//! Pure in-memory state behind [`crate::log::JournaledLog`]. Nothing here
//! touches the journal or the clock; callers pass timestamps in, which keeps
//! live operation and journal replay on the same code path.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vote_types::vote::Fields;

use crate::stream::{EntryId, PendingEntry, PendingRange, PendingSummary, StreamEntry};

/// Ledger record of one pending entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PendingInfo {
    pub consumer: String,
    pub delivery_count: u64,
    /// Unix millis of the last delivery or claim.
    pub delivered_at: i64,
}

#[derive(Debug, Default)]
pub(crate) struct ConsumerGroup {
    /// Highest id ever delivered to the group.
    pub last_delivered: EntryId,
    pub pending: BTreeMap<EntryId, PendingInfo>,
}

impl ConsumerGroup {
    pub fn deliver(&mut self, ids: &[EntryId], consumer: &str, at: i64) {
        for id in ids {
            self.pending.insert(
                *id,
                PendingInfo {
                    consumer: consumer.to_string(),
                    delivery_count: 1,
                    delivered_at: at,
                },
            );
            self.last_delivered = self.last_delivered.max(*id);
        }
    }

    /// Subset of `ids` that is pending and idle for at least `min_idle`.
    pub fn claimable(&self, ids: &[EntryId], min_idle: Duration, now: i64) -> Vec<EntryId> {
        let min_idle = min_idle.as_millis() as i64;
        ids.iter()
            .copied()
            .filter(|id| {
                self.pending
                    .get(id)
                    .is_some_and(|info| now.saturating_sub(info.delivered_at) >= min_idle)
            })
            .collect()
    }

    pub fn claim(&mut self, ids: &[EntryId], consumer: &str, at: i64) {
        for id in ids {
            if let Some(info) = self.pending.get_mut(id) {
                info.consumer = consumer.to_string();
                info.delivery_count += 1;
                info.delivered_at = at;
            }
        }
    }

    pub fn ack(&mut self, ids: &[EntryId]) -> u64 {
        ids.iter()
            .filter(|id| self.pending.remove(*id).is_some())
            .count() as u64
    }

    pub fn list(&self, range: &PendingRange, now: i64) -> Vec<PendingEntry> {
        let lower = match range.after {
            Some(after) => std::ops::Bound::Excluded(after),
            None => std::ops::Bound::Unbounded,
        };
        self.pending
            .range((lower, std::ops::Bound::Unbounded))
            .filter(|(_, info)| {
                range
                    .consumer
                    .as_deref()
                    .map_or(true, |c| c == info.consumer)
            })
            .take(range.count)
            .map(|(id, info)| PendingEntry {
                id: *id,
                consumer: info.consumer.clone(),
                delivery_count: info.delivery_count,
                idle: Duration::from_millis(now.saturating_sub(info.delivered_at).max(0) as u64),
            })
            .collect()
    }

    pub fn summary(&self) -> PendingSummary {
        let mut per_consumer = BTreeMap::new();
        for info in self.pending.values() {
            *per_consumer.entry(info.consumer.clone()).or_insert(0) += 1;
        }
        PendingSummary {
            count: self.pending.len() as u64,
            lowest: self.pending.keys().next().copied(),
            highest: self.pending.keys().next_back().copied(),
            per_consumer,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StreamState {
    pub entries: BTreeMap<EntryId, Fields>,
    pub last_id: EntryId,
    pub groups: HashMap<String, ConsumerGroup>,
}

impl StreamState {
    pub fn next_id(&self, now: i64) -> EntryId {
        EntryId::next_after(self.last_id, now.max(0) as u64)
    }

    pub fn insert(&mut self, id: EntryId, fields: Fields) {
        self.entries.insert(id, fields);
        self.last_id = self.last_id.max(id);
    }

    /// Up to `count` entries after the group's delivery cursor.
    pub fn undelivered(&self, group: &ConsumerGroup, count: usize) -> Vec<StreamEntry> {
        self.entries
            .range((
                std::ops::Bound::Excluded(group.last_delivered),
                std::ops::Bound::Unbounded,
            ))
            .take(count)
            .map(|(id, fields)| StreamEntry {
                id: *id,
                fields: fields.clone(),
            })
            .collect()
    }

    /// Up to `count` entries with ids strictly after `after`.
    pub fn range_after(&self, after: Option<EntryId>, count: usize) -> Vec<StreamEntry> {
        let lower = match after {
            Some(id) => std::ops::Bound::Excluded(id),
            None => std::ops::Bound::Unbounded,
        };
        self.entries
            .range((lower, std::ops::Bound::Unbounded))
            .take(count)
            .map(|(id, fields)| StreamEntry {
                id: *id,
                fields: fields.clone(),
            })
            .collect()
    }

    /// Entries for `ids`, skipping any that are not in the stream.
    pub fn lookup(&self, ids: &[EntryId]) -> Vec<StreamEntry> {
        ids.iter()
            .filter_map(|id| {
                self.entries.get(id).map(|fields| StreamEntry {
                    id: *id,
                    fields: fields.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> EntryId {
        EntryId::new(n, 0)
    }

    fn stream_with(n: u64) -> StreamState {
        let mut stream = StreamState::default();
        for i in 1..=n {
            stream.insert(id(i), Fields::new());
        }
        stream
    }

    #[test]
    fn test_undelivered_respects_cursor_and_count() {
        let stream = stream_with(5);
        let mut group = ConsumerGroup::default();
        let first: Vec<EntryId> = stream.undelivered(&group, 2).iter().map(|e| e.id).collect();
        assert_eq!(first, vec![id(1), id(2)]);

        group.deliver(&first, "c1", 0);
        let next: Vec<EntryId> = stream.undelivered(&group, 10).iter().map(|e| e.id).collect();
        assert_eq!(next, vec![id(3), id(4), id(5)]);
    }

    #[test]
    fn test_ack_removes_only_pending_ids() {
        let mut group = ConsumerGroup::default();
        group.deliver(&[id(1), id(2)], "c1", 0);
        assert_eq!(group.ack(&[id(1), id(9)]), 1);
        assert_eq!(group.ack(&[id(1)]), 0);
        assert_eq!(group.pending.len(), 1);
    }

    #[test]
    fn test_claimable_requires_min_idle() {
        let mut group = ConsumerGroup::default();
        group.deliver(&[id(1)], "c1", 1_000);
        group.deliver(&[id(2)], "c1", 5_000);

        let idle = Duration::from_secs(3);
        assert_eq!(group.claimable(&[id(1), id(2), id(3)], idle, 6_000), vec![id(1)]);
        assert_eq!(group.claimable(&[id(1), id(2)], idle, 8_000), vec![id(1), id(2)]);
    }

    #[test]
    fn test_claim_moves_owner_and_counts_delivery() {
        let mut group = ConsumerGroup::default();
        group.deliver(&[id(1)], "c1", 0);
        group.claim(&[id(1)], "c2", 10);

        let info = &group.pending[&id(1)];
        assert_eq!(info.consumer, "c2");
        assert_eq!(info.delivery_count, 2);
        assert_eq!(info.delivered_at, 10);
    }

    #[test]
    fn test_list_pages_and_filters() {
        let mut group = ConsumerGroup::default();
        group.deliver(&[id(1), id(2)], "c1", 0);
        group.deliver(&[id(3)], "c2", 0);

        let page = group.list(&PendingRange::first(2), 50);
        assert_eq!(page.iter().map(|p| p.id).collect::<Vec<_>>(), vec![id(1), id(2)]);
        assert_eq!(page[0].idle, Duration::from_millis(50));

        let rest = group.list(&PendingRange::first(2).after(id(2)), 50);
        assert_eq!(rest.iter().map(|p| p.id).collect::<Vec<_>>(), vec![id(3)]);

        let mut only_c2 = PendingRange::first(10);
        only_c2.consumer = Some("c2".to_string());
        assert_eq!(group.list(&only_c2, 0).len(), 1);
    }

    #[test]
    fn test_summary_counts_per_consumer() {
        let mut group = ConsumerGroup::default();
        group.deliver(&[id(1), id(2)], "c1", 0);
        group.deliver(&[id(3)], "c2", 0);

        let summary = group.summary();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.lowest, Some(id(1)));
        assert_eq!(summary.highest, Some(id(3)));
        assert_eq!(summary.per_consumer["c1"], 2);
    }
}
