//! System-of-Record Store: durable vote rows
//!
//! Rows are keyed by `(candidate_id, vote_id)` with the time bucket as a
//! stored attribute. Writing the same vote twice lands on the same key, so a
//! redelivered log entry overwrites its own row instead of adding a second
//! one, and two distinct votes in the same bucket never collide.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};
use vote_types::clock::Clock;
use vote_types::ids::{CandidateId, VoteId};
use vote_types::vote::{TimeBucket, VoteEvent};

use crate::journal::{JournalConfig, JournalError, JournalWriter};
use crate::reader::replay_dir;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Insert or overwrite the row of `vote`.
    async fn upsert(&self, vote: &VoteEvent) -> Result<(), StoreError>;

    async fn get(
        &self,
        candidate_id: CandidateId,
        vote_id: VoteId,
    ) -> Result<Option<VoteEvent>, StoreError>;

    /// All votes of a candidate ordered by vote id (mint order).
    async fn votes_for(&self, candidate_id: CandidateId) -> Result<Vec<VoteEvent>, StoreError>;

    async fn votes_in_bucket(
        &self,
        candidate_id: CandidateId,
        bucket: &TimeBucket,
    ) -> Result<Vec<VoteEvent>, StoreError>;

    /// Full scan: number of rows per candidate.
    async fn counts_by_candidate(&self) -> Result<BTreeMap<CandidateId, u64>, StoreError>;

    async fn len(&self) -> Result<u64, StoreError>;
}

// ── Vote Table ──────────────────────────────────────────────────────

/// Ordered row set shared by both store implementations.
#[derive(Debug, Default)]
struct VoteTable {
    rows: BTreeMap<(CandidateId, VoteId), TimeBucket>,
}

impl VoteTable {
    /// Returns `false` when the identical row was already present.
    fn upsert(&mut self, vote: &VoteEvent) -> bool {
        let key = (vote.candidate_id, vote.vote_id);
        if self.rows.get(&key) == Some(&vote.time_bucket) {
            return false;
        }
        self.rows.insert(key, vote.time_bucket.clone());
        true
    }

    fn get(&self, candidate_id: CandidateId, vote_id: VoteId) -> Option<VoteEvent> {
        self.rows
            .get(&(candidate_id, vote_id))
            .map(|bucket| row(candidate_id, vote_id, bucket))
    }

    fn candidate_rows(&self, candidate_id: CandidateId) -> impl Iterator<Item = VoteEvent> + '_ {
        let lower = (candidate_id, VoteId::from_uuid(uuid::Uuid::nil()));
        let upper = (candidate_id, VoteId::from_uuid(uuid::Uuid::from_u128(u128::MAX)));
        self.rows
            .range(lower..=upper)
            .map(|((c, v), bucket)| row(*c, *v, bucket))
    }

    fn counts(&self) -> BTreeMap<CandidateId, u64> {
        let mut counts = BTreeMap::new();
        for (candidate_id, _) in self.rows.keys() {
            *counts.entry(*candidate_id).or_insert(0) += 1;
        }
        counts
    }
}

fn row(candidate_id: CandidateId, vote_id: VoteId, bucket: &TimeBucket) -> VoteEvent {
    VoteEvent {
        vote_id,
        candidate_id,
        time_bucket: bucket.clone(),
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("store lock poisoned".to_string())
}

// ── In-memory Store ─────────────────────────────────────────────────

/// Non-durable store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryVoteStore {
    table: RwLock<VoteTable>,
}

impl MemoryVoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VoteStore for MemoryVoteStore {
    async fn upsert(&self, vote: &VoteEvent) -> Result<(), StoreError> {
        self.table.write().map_err(|_| poisoned())?.upsert(vote);
        Ok(())
    }

    async fn get(
        &self,
        candidate_id: CandidateId,
        vote_id: VoteId,
    ) -> Result<Option<VoteEvent>, StoreError> {
        Ok(self.table.read().map_err(|_| poisoned())?.get(candidate_id, vote_id))
    }

    async fn votes_for(&self, candidate_id: CandidateId) -> Result<Vec<VoteEvent>, StoreError> {
        let table = self.table.read().map_err(|_| poisoned())?;
        Ok(table.candidate_rows(candidate_id).collect())
    }

    async fn votes_in_bucket(
        &self,
        candidate_id: CandidateId,
        bucket: &TimeBucket,
    ) -> Result<Vec<VoteEvent>, StoreError> {
        let table = self.table.read().map_err(|_| poisoned())?;
        Ok(table
            .candidate_rows(candidate_id)
            .filter(|v| &v.time_bucket == bucket)
            .collect())
    }

    async fn counts_by_candidate(&self) -> Result<BTreeMap<CandidateId, u64>, StoreError> {
        Ok(self.table.read().map_err(|_| poisoned())?.counts())
    }

    async fn len(&self) -> Result<u64, StoreError> {
        Ok(self.table.read().map_err(|_| poisoned())?.rows.len() as u64)
    }
}

// ── Journaled Store ─────────────────────────────────────────────────

struct JournaledTable {
    table: VoteTable,
    journal: JournalWriter,
}

struct Shared {
    inner: Mutex<JournaledTable>,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, JournaledTable>, StoreError> {
        self.inner.lock().map_err(|_| poisoned())
    }
}

/// Durable store: every new or changed row is journaled before it becomes
/// visible. Re-writing an identical row does not grow the journal.
///
/// Operations run on the blocking pool since an upsert may fsync while
/// holding the table lock.
pub struct JournaledVoteStore {
    shared: Arc<Shared>,
}

impl JournaledVoteStore {
    /// Open (or create) the store, replaying existing rows. Records that do
    /// not decode as a vote are skipped and counted.
    pub fn open(config: JournalConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let replay = replay_dir(&config.dir).map_err(JournalError::from)?;
        let mut table = VoteTable::default();
        let mut skipped = 0usize;
        for entry in &replay.entries {
            match entry.decode::<VoteEvent>() {
                Ok(vote) => {
                    table.upsert(&vote);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(sequence = entry.sequence, error = %e, "Undecodable vote record skipped");
                }
            }
        }
        info!(
            dir = %config.dir.display(),
            rows = table.rows.len(),
            skipped,
            "Vote store recovered"
        );

        let journal = JournalWriter::open(config, replay.next_sequence())?;
        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(JournaledTable { table, journal }),
                clock,
            }),
        })
    }

    pub fn sync(&self) -> Result<(), StoreError> {
        self.shared.lock()?.journal.sync()?;
        Ok(())
    }

    async fn with_table<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut JournaledTable, &dyn Clock) -> Result<T, StoreError> + Send + 'static,
    {
        let shared = self.shared.clone();
        tokio::task::spawn_blocking(move || {
            let mut inner = shared.lock()?;
            op(&mut inner, shared.clock.as_ref())
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl VoteStore for JournaledVoteStore {
    async fn upsert(&self, vote: &VoteEvent) -> Result<(), StoreError> {
        let vote = vote.clone();
        self.with_table(move |inner, clock| {
            let unchanged = inner.table.get(vote.candidate_id, vote.vote_id).as_ref() == Some(&vote);
            if unchanged {
                return Ok(());
            }
            inner.journal.append(clock.now_millis(), "vote", &vote)?;
            inner.table.upsert(&vote);
            Ok(())
        })
        .await
    }

    async fn get(
        &self,
        candidate_id: CandidateId,
        vote_id: VoteId,
    ) -> Result<Option<VoteEvent>, StoreError> {
        self.with_table(move |inner, _| Ok(inner.table.get(candidate_id, vote_id)))
            .await
    }

    async fn votes_for(&self, candidate_id: CandidateId) -> Result<Vec<VoteEvent>, StoreError> {
        self.with_table(move |inner, _| Ok(inner.table.candidate_rows(candidate_id).collect()))
            .await
    }

    async fn votes_in_bucket(
        &self,
        candidate_id: CandidateId,
        bucket: &TimeBucket,
    ) -> Result<Vec<VoteEvent>, StoreError> {
        let bucket = bucket.clone();
        self.with_table(move |inner, _| {
            Ok(inner
                .table
                .candidate_rows(candidate_id)
                .filter(|v| v.time_bucket == bucket)
                .collect())
        })
        .await
    }

    async fn counts_by_candidate(&self) -> Result<BTreeMap<CandidateId, u64>, StoreError> {
        self.with_table(|inner, _| Ok(inner.table.counts())).await
    }

    async fn len(&self) -> Result<u64, StoreError> {
        self.with_table(|inner, _| Ok(inner.table.rows.len() as u64))
            .await
    }
}

// ── Tests ───────────────────────────────────────────────────────────
