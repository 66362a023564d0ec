//! Live totals across a restart, with and without reconciliation in between.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use persistence::candidates::CandidateJournal;
use persistence::journal::JournalConfig;
use persistence::log::JournaledLog;
use persistence::store::{JournaledVoteStore, VoteStore};
use persistence::stream::EventLog;
use reconciler::{Reconciler, ReconcilerConfig};
use tally::publisher::{PublisherConfig, DEFAULT_STREAM};
use tally::{AggregateCounters, BroadcastHub, CandidateRegistry, VotePublisher};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use vote_types::clock::{Clock, ManualClock};

// 2025-12-18T12:34:56Z
const NOW: i64 = 1_766_061_296_000;
const GROUP: &str = "voto_group";

/// Everything the gateway opens at startup, rooted in one data dir.
struct Node {
    log: Arc<JournaledLog>,
    store: Arc<JournaledVoteStore>,
    publisher: VotePublisher,
    registry: Arc<CandidateRegistry>,
}

async fn boot(dir: &Path, clock: Arc<ManualClock>) -> Node {
    let clock_dyn: Arc<dyn Clock> = clock;
    let log = Arc::new(JournaledLog::open(JournalConfig::new(dir.join("log")), clock_dyn.clone()).unwrap());
    let store =
        Arc::new(JournaledVoteStore::open(JournalConfig::new(dir.join("votes")), clock_dyn.clone()).unwrap());
    let (journal, existing) =
        CandidateJournal::open(JournalConfig::new(dir.join("candidates")), clock_dyn.clone()).unwrap();
    log.create_group(DEFAULT_STREAM, GROUP).await.unwrap();

    let registry = Arc::new(CandidateRegistry::with_journal(journal, existing));
    let counters = Arc::new(AggregateCounters::new());
    counters
        .rebuild_from_log(log.as_ref(), DEFAULT_STREAM)
        .await
        .unwrap();

    let publisher = VotePublisher::new(
        log.clone(),
        counters,
        registry.clone(),
        BroadcastHub::default(),
        clock_dyn,
        PublisherConfig::default(),
    );
    Node {
        log,
        store,
        publisher,
        registry,
    }
}

fn reconciler(node: &Node) -> Reconciler {
    Reconciler::new(
        node.log.clone(),
        node.store.clone(),
        ReconcilerConfig {
            stream: DEFAULT_STREAM.to_string(),
            group: GROUP.to_string(),
            consumer: "restart".to_string(),
            block: Duration::from_millis(10),
            ..ReconcilerConfig::default()
        },
    )
}

fn alice(count: u64) -> BTreeMap<String, u64> {
    BTreeMap::from([("Alice".to_string(), count)])
}

#[tokio::test]
async fn test_unreconciled_vote_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(NOW));
    {
        let node = boot(tmp.path(), clock.clone()).await;
        let a = node.registry.create("Alice").unwrap();
        node.publisher.submit_vote(a.id).await.unwrap();
        assert_eq!(node.publisher.current_totals(), alice(1));
    }

    let node = boot(tmp.path(), clock).await;
    assert_eq!(node.publisher.current_totals(), alice(1));
    assert_eq!(node.store.len().await.unwrap(), 0);

    // Reconciling after the restart writes the row without touching totals.
    let report = reconciler(&node).read_new(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.acked, 1);
    assert_eq!(node.store.len().await.unwrap(), 1);
    assert_eq!(node.publisher.current_totals(), alice(1));
}

#[tokio::test]
async fn test_reconciled_and_pending_votes_both_count_after_restart() {
    let tmp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(NOW));
    {
        let node = boot(tmp.path(), clock.clone()).await;
        let a = node.registry.create("Alice").unwrap();
        node.publisher.submit_vote(a.id).await.unwrap();
        reconciler(&node).read_new(&CancellationToken::new()).await.unwrap();
        node.publisher.submit_vote(a.id).await.unwrap();
    }

    let node = boot(tmp.path(), clock).await;
    assert_eq!(node.store.len().await.unwrap(), 1);
    assert_eq!(node.publisher.current_totals(), alice(2));

    let a = node.registry.list().remove(0);
    node.publisher.submit_vote(a.id).await.unwrap();
    assert_eq!(node.publisher.current_totals(), alice(3));
}
