//! Journaled Event Log: the durable [`EventLog`] implementation
//!
//! Every mutation (group creation, append, delivery, claim, ack) is written
//! to the journal before it is applied to the in-memory index, so stream
//! contents, group cursors and pending ledgers all survive a restart:
//! [`JournaledLog::open`] replays the journal through the same `apply` path
//! that live operations use.
//!
//! Readers blocked in `read_group_new` are woken by appends through a
//! [`Notify`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use vote_types::clock::Clock;
use vote_types::vote::Fields;

use crate::group::{ConsumerGroup, StreamState};
use crate::journal::{JournalConfig, JournalWriter};
use crate::reader::replay_dir;
use crate::stream::{
    EntryId, EventLog, LogError, PendingEntry, PendingRange, PendingSummary, StreamEntry,
};

/// Journal record of one log mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum LogOp {
    CreateGroup {
        stream: String,
        group: String,
    },
    Append {
        stream: String,
        id: EntryId,
        fields: Fields,
    },
    Deliver {
        stream: String,
        group: String,
        consumer: String,
        ids: Vec<EntryId>,
        at: i64,
    },
    Claim {
        stream: String,
        group: String,
        consumer: String,
        ids: Vec<EntryId>,
        at: i64,
    },
    Ack {
        stream: String,
        group: String,
        ids: Vec<EntryId>,
    },
}

impl LogOp {
    fn kind(&self) -> &'static str {
        match self {
            LogOp::CreateGroup { .. } => "group",
            LogOp::Append { .. } => "append",
            LogOp::Deliver { .. } => "deliver",
            LogOp::Claim { .. } => "claim",
            LogOp::Ack { .. } => "ack",
        }
    }
}

#[derive(Default)]
struct LogInner {
    streams: HashMap<String, StreamState>,
    journal: Option<JournalWriter>,
}

impl LogInner {
    fn commit(&mut self, now: i64, op: LogOp) -> Result<(), LogError> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(now, op.kind(), &op)?;
        }
        self.apply(op);
        Ok(())
    }

    fn apply(&mut self, op: LogOp) {
        match op {
            LogOp::CreateGroup { stream, group } => {
                self.streams
                    .entry(stream)
                    .or_default()
                    .groups
                    .entry(group)
                    .or_default();
            }
            LogOp::Append { stream, id, fields } => {
                self.streams.entry(stream).or_default().insert(id, fields);
            }
            LogOp::Deliver {
                stream,
                group,
                consumer,
                ids,
                at,
            } => match self.group_mut(&stream, &group) {
                Some(g) => g.deliver(&ids, &consumer, at),
                None => warn!(%stream, %group, "Delivery for unknown group ignored"),
            },
            LogOp::Claim {
                stream,
                group,
                consumer,
                ids,
                at,
            } => match self.group_mut(&stream, &group) {
                Some(g) => g.claim(&ids, &consumer, at),
                None => warn!(%stream, %group, "Claim for unknown group ignored"),
            },
            LogOp::Ack { stream, group, ids } => {
                if let Some(g) = self.group_mut(&stream, &group) {
                    g.ack(&ids);
                }
            }
        }
    }

    fn group_mut(&mut self, stream: &str, group: &str) -> Option<&mut ConsumerGroup> {
        self.streams.get_mut(stream)?.groups.get_mut(group)
    }

    fn stream_and_group(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<(&StreamState, &ConsumerGroup), LogError> {
        self.streams
            .get(stream)
            .and_then(|s| s.groups.get(group).map(|g| (s, g)))
            .ok_or_else(|| LogError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })
    }
}

/// Event log backed by an optional on-disk journal.
///
/// Operations run on the blocking pool: a journal append may fsync, and the
/// state lock is held across it.
pub struct JournaledLog {
    shared: Arc<Shared>,
    appended: Notify,
}

struct Shared {
    inner: Mutex<LogInner>,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, LogInner>, LogError> {
        self.inner
            .lock()
            .map_err(|_| LogError::Unavailable("log state lock poisoned".to_string()))
    }
}

impl JournaledLog {
    /// A log that keeps everything in memory. Same semantics, no durability.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::from_inner(LogInner::default(), clock)
    }

    /// Open (or create) a journaled log, replaying existing state.
    pub fn open(config: JournalConfig, clock: Arc<dyn Clock>) -> Result<Self, LogError> {
        let replay = replay_dir(&config.dir).map_err(crate::journal::JournalError::from)?;
        let mut inner = LogInner::default();
        let mut skipped = 0usize;
        for entry in &replay.entries {
            match entry.decode::<LogOp>() {
                Ok(op) => inner.apply(op),
                Err(e) => {
                    skipped += 1;
                    warn!(sequence = entry.sequence, error = %e, "Undecodable log record skipped");
                }
            }
        }

        info!(
            dir = %config.dir.display(),
            records = replay.entries.len(),
            skipped,
            streams = inner.streams.len(),
            "Event log recovered"
        );

        inner.journal = Some(JournalWriter::open(config, replay.next_sequence())?);
        Ok(Self::from_inner(inner, clock))
    }

    fn from_inner(inner: LogInner, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                clock,
            }),
            appended: Notify::new(),
        }
    }

    /// Flush and fsync the journal.
    pub fn sync(&self) -> Result<(), LogError> {
        if let Some(journal) = self.shared.lock()?.journal.as_mut() {
            journal.sync()?;
        }
        Ok(())
    }

    /// Run `op` against the locked state on the blocking pool, passing the
    /// current clock reading.
    async fn with_state<T, F>(&self, op: F) -> Result<T, LogError>
    where
        T: Send + 'static,
        F: FnOnce(&mut LogInner, i64) -> Result<T, LogError> + Send + 'static,
    {
        let shared = self.shared.clone();
        tokio::task::spawn_blocking(move || {
            let now = shared.clock.now_millis();
            let mut inner = shared.lock()?;
            op(&mut inner, now)
        })
        .await
        .map_err(|e| LogError::Unavailable(format!("log task failed: {e}")))?
    }

    async fn try_deliver(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, LogError> {
        let (stream, group, consumer) = (stream.to_string(), group.to_string(), consumer.to_string());
        self.with_state(move |inner, now| {
            let (state, g) = inner.stream_and_group(&stream, &group)?;
            let entries = state.undelivered(g, count);
            if entries.is_empty() {
                return Ok(entries);
            }

            debug!(%stream, %group, %consumer, delivered = entries.len(), "Delivered new entries");
            inner.commit(
                now,
                LogOp::Deliver {
                    stream,
                    group,
                    consumer,
                    ids: entries.iter().map(|e| e.id).collect(),
                    at: now,
                },
            )?;
            Ok(entries)
        })
        .await
    }
}

#[async_trait]
impl EventLog for JournaledLog {
    async fn create_group(&self, stream: &str, group: &str) -> Result<bool, LogError> {
        let (stream, group) = (stream.to_string(), group.to_string());
        self.with_state(move |inner, now| {
            if inner.stream_and_group(&stream, &group).is_ok() {
                return Ok(false);
            }
            info!(%stream, %group, "Consumer group created");
            inner.commit(now, LogOp::CreateGroup { stream, group })?;
            Ok(true)
        })
        .await
    }

    async fn append(&self, stream: &str, fields: Fields) -> Result<EntryId, LogError> {
        let stream = stream.to_string();
        let id = self
            .with_state(move |inner, now| {
                let id = match inner.streams.get(&stream) {
                    Some(state) => state.next_id(now),
                    None => StreamState::default().next_id(now),
                };
                inner.commit(now, LogOp::Append { stream, id, fields })?;
                Ok(id)
            })
            .await?;
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_group_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, LogError> {
        let Some(block) = block else {
            return self.try_deliver(stream, group, consumer, count).await;
        };

        let deadline = tokio::time::Instant::now() + block;
        loop {
            // Register interest before checking so an append in between is not missed
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.try_deliver(stream, group, consumer, count).await?;
            if !entries.is_empty() {
                return Ok(entries);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn list_pending(
        &self,
        stream: &str,
        group: &str,
        range: PendingRange,
    ) -> Result<Vec<PendingEntry>, LogError> {
        let (stream, group) = (stream.to_string(), group.to_string());
        self.with_state(move |inner, now| {
            let (_, g) = inner.stream_and_group(&stream, &group)?;
            Ok(g.list(&range, now))
        })
        .await
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        ids: &[EntryId],
        min_idle: Duration,
    ) -> Result<Vec<StreamEntry>, LogError> {
        let (stream, group, consumer) = (stream.to_string(), group.to_string(), consumer.to_string());
        let ids = ids.to_vec();
        self.with_state(move |inner, now| {
            let (state, g) = inner.stream_and_group(&stream, &group)?;
            let claimable = g.claimable(&ids, min_idle, now);
            let entries = state.lookup(&claimable);
            if entries.is_empty() {
                return Ok(entries);
            }

            debug!(%stream, %group, %consumer, claimed = entries.len(), "Claimed idle entries");
            inner.commit(
                now,
                LogOp::Claim {
                    stream,
                    group,
                    consumer,
                    ids: entries.iter().map(|e| e.id).collect(),
                    at: now,
                },
            )?;
            Ok(entries)
        })
        .await
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, LogError> {
        let (stream, group) = (stream.to_string(), group.to_string());
        let ids = ids.to_vec();
        self.with_state(move |inner, now| {
            let (_, g) = inner.stream_and_group(&stream, &group)?;
            let pending: Vec<EntryId> = ids
                .into_iter()
                .filter(|id| g.pending.contains_key(id))
                .collect();
            if pending.is_empty() {
                return Ok(0);
            }

            let acked = pending.len() as u64;
            inner.commit(
                now,
                LogOp::Ack {
                    stream,
                    group,
                    ids: pending,
                },
            )?;
            Ok(acked)
        })
        .await
    }

    async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary, LogError> {
        let (stream, group) = (stream.to_string(), group.to_string());
        self.with_state(move |inner, _| {
            let (_, g) = inner.stream_and_group(&stream, &group)?;
            Ok(g.summary())
        })
        .await
    }

    async fn range(
        &self,
        stream: &str,
        after: Option<EntryId>,
        count: usize,
    ) -> Result<Vec<StreamEntry>, LogError> {
        let stream = stream.to_string();
        self.with_state(move |inner, _| {
            Ok(inner
                .streams
                .get(&stream)
                .map_or_else(Vec::new, |s| s.range_after(after, count)))
        })
        .await
    }

    async fn len(&self, stream: &str) -> Result<u64, LogError> {
        let stream = stream.to_string();
        self.with_state(move |inner, _| {
            Ok(inner
                .streams
                .get(&stream)
                .map_or(0, |s| s.entries.len() as u64))
        })
        .await
    }
}

// ── Tests ───────────────────────────────────────────────────────────
