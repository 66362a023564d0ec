//! Reopening the journaled log and store after unclean shutdowns.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use persistence::journal::JournalConfig;
use persistence::log::JournaledLog;
use persistence::store::{JournaledVoteStore, VoteStore};
use persistence::stream::{EntryId, EventLog, PendingRange};
use tempfile::TempDir;
use vote_types::clock::ManualClock;
use vote_types::ids::CandidateId;
use vote_types::vote::VoteEvent;

// 2025-12-18T12:34:56Z
const NOW: i64 = 1_766_061_296_000;

fn segments(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "bin"))
        .collect();
    files.sort();
    files
}

/// Chop `bytes` off the newest segment, as a crash mid-write would.
fn tear_tail(dir: &Path, bytes: u64) {
    let last = segments(dir).pop().expect("at least one segment");
    let file = OpenOptions::new().write(true).open(&last).unwrap();
    let len = file.metadata().unwrap().len();
    file.set_len(len.saturating_sub(bytes)).unwrap();
}

#[tokio::test]
async fn test_torn_ack_leaves_entry_pending_after_reopen() {
    let tmp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(NOW));
    let first: EntryId;
    {
        let log = JournaledLog::open(JournalConfig::new(tmp.path()), clock.clone()).unwrap();
        log.create_group("votes", "g").await.unwrap();
        for _ in 0..2 {
            let vote = VoteEvent::mint(CandidateId::new(), NOW);
            log.append("votes", vote.to_fields()).await.unwrap();
        }
        let delivered = log.read_group_new("votes", "g", "c", 10, None).await.unwrap();
        first = delivered[0].id;
        assert_eq!(log.ack("votes", "g", &[first]).await.unwrap(), 1);
    }

    tear_tail(tmp.path(), 3);

    let log = JournaledLog::open(JournalConfig::new(tmp.path()), clock.clone()).unwrap();
    assert_eq!(log.len("votes").await.unwrap(), 2);
    let pending = log
        .list_pending("votes", "g", PendingRange::first(10))
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, first);
    assert!(pending.iter().all(|p| p.consumer == "c"));

    // Nothing is delivered twice as new, and appends continue past the old ids.
    assert!(log.read_group_new("votes", "g", "c", 10, None).await.unwrap().is_empty());
    let next = log
        .append("votes", VoteEvent::mint(CandidateId::new(), NOW).to_fields())
        .await
        .unwrap();
    assert!(next > pending[1].id);
}

#[tokio::test]
async fn test_writes_after_a_torn_tail_survive_the_next_reopen() {
    let tmp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(NOW));
    let candidate = CandidateId::new();
    let kept = VoteEvent::mint(candidate, NOW);
    let torn = VoteEvent::mint(candidate, NOW + 1);
    {
        let store = JournaledVoteStore::open(JournalConfig::new(tmp.path()), clock.clone()).unwrap();
        store.upsert(&kept).await.unwrap();
        store.upsert(&torn).await.unwrap();
    }
    tear_tail(tmp.path(), 1);

    let later = VoteEvent::mint(candidate, NOW + 2);
    {
        let store = JournaledVoteStore::open(JournalConfig::new(tmp.path()), clock.clone()).unwrap();
        assert_eq!(store.votes_for(candidate).await.unwrap(), vec![kept.clone()]);
        store.upsert(&later).await.unwrap();
    }

    let store = JournaledVoteStore::open(JournalConfig::new(tmp.path()), clock.clone()).unwrap();
    assert_eq!(store.votes_for(candidate).await.unwrap(), vec![kept, later]);
    assert!(segments(tmp.path()).len() >= 2);
}
