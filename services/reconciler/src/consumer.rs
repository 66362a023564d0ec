//! Reconciliation Consumer
//!
//! Drains the vote stream into the system-of-record store through the
//! `voto_group` consumer group. Each round has two phases:
//!
//! 1. Reclaim: walk up to `reclaim_max_pages` pages of the group's pending
//!    ledger and take over entries idle for at least `min_idle`. The page
//!    cursor moves forward page by page and wraps to the start at the end of
//!    the ledger, so pages full of entries that can never be parsed do not
//!    hide the ones after them.
//! 2. New entries: read entries never delivered to the group, waiting up to
//!    `block` when there are none.
//!
//! Every entry goes through parse → upsert → ack. An entry is acked only
//! after its row is written; anything that fails earlier stays pending and is
//! retried by a later reclaim pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use persistence::store::VoteStore;
use persistence::stream::{EntryId, EventLog, LogError, PendingRange, StreamEntry};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vote_types::errors::PersistFailure;
use vote_types::vote::VoteEvent;

use crate::backoff::Backoff;
use crate::config::ReconcilerConfig;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Event log error: {0}")]
    Log(#[from] LogError),
}

/// What happened to one delivered entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// Row written and entry acknowledged.
    Acked,
    /// Fields could not be parsed; entry left pending.
    ParseFailed,
    /// Store write failed; entry left pending.
    PersistFailed(PersistFailure),
    /// Row written but the ack did not reach the log; entry left pending and
    /// its rewrite on redelivery is harmless.
    AckFailed,
}

/// Tally of one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub claimed: u64,
    pub delivered: u64,
    pub acked: u64,
    pub parse_failed: u64,
    pub persist_failed: u64,
    pub ack_failed: u64,
}

impl RoundReport {
    fn record(&mut self, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Acked => self.acked += 1,
            EntryOutcome::ParseFailed => self.parse_failed += 1,
            EntryOutcome::PersistFailed(_) => self.persist_failed += 1,
            EntryOutcome::AckFailed => self.ack_failed += 1,
        }
    }

    fn merge(&mut self, other: RoundReport) {
        self.claimed += other.claimed;
        self.delivered += other.delivered;
        self.acked += other.acked;
        self.parse_failed += other.parse_failed;
        self.persist_failed += other.persist_failed;
        self.ack_failed += other.ack_failed;
    }

    /// The store or the log misbehaved during the round.
    pub fn degraded(&self) -> bool {
        self.persist_failed > 0 || self.ack_failed > 0
    }
}

/// Lifetime counters of one reconciler.
#[derive(Debug, Default)]
pub struct ReconcilerStats {
    pub claimed: AtomicU64,
    pub delivered: AtomicU64,
    pub acked: AtomicU64,
    pub parse_failed: AtomicU64,
    pub persist_failed: AtomicU64,
    pub ack_failed: AtomicU64,
    pub log_errors: AtomicU64,
}

impl ReconcilerStats {
    fn add(&self, report: &RoundReport) {
        self.claimed.fetch_add(report.claimed, Ordering::Relaxed);
        self.delivered.fetch_add(report.delivered, Ordering::Relaxed);
        self.acked.fetch_add(report.acked, Ordering::Relaxed);
        self.parse_failed.fetch_add(report.parse_failed, Ordering::Relaxed);
        self.persist_failed.fetch_add(report.persist_failed, Ordering::Relaxed);
        self.ack_failed.fetch_add(report.ack_failed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RoundReport {
        RoundReport {
            claimed: self.claimed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            parse_failed: self.parse_failed.load(Ordering::Relaxed),
            persist_failed: self.persist_failed.load(Ordering::Relaxed),
            ack_failed: self.ack_failed.load(Ordering::Relaxed),
        }
    }
}

pub struct Reconciler {
    log: Arc<dyn EventLog>,
    store: Arc<dyn VoteStore>,
    config: ReconcilerConfig,
    stats: Arc<ReconcilerStats>,
    /// Last pending id inspected by the reclaim phase; `None` restarts at the
    /// head of the ledger.
    reclaim_cursor: Mutex<Option<EntryId>>,
}

impl Reconciler {
    pub fn new(log: Arc<dyn EventLog>, store: Arc<dyn VoteStore>, config: ReconcilerConfig) -> Self {
        Self {
            log,
            store,
            config,
            stats: Arc::new(ReconcilerStats::default()),
            reclaim_cursor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<ReconcilerStats> {
        self.stats.clone()
    }

    /// Run until `shutdown` fires.
    ///
    /// Cancellation is checked between entries, so an entry whose row is being
    /// written is always finished (and acked) before returning. Log errors and
    /// degraded rounds back off before the next round.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            stream = %self.config.stream,
            group = %self.config.group,
            consumer = %self.config.consumer,
            "Reconciler started"
        );

        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);
        let mut next_reclaim = Instant::now();

        while !shutdown.is_cancelled() {
            let mut round = RoundReport::default();
            let mut result = Ok(());

            if Instant::now() >= next_reclaim {
                match self.reclaim_pass(&shutdown).await {
                    Ok(report) => round.merge(report),
                    Err(e) => result = Err(e),
                }
                next_reclaim = Instant::now() + self.config.reclaim_interval;
            }

            if result.is_ok() && !shutdown.is_cancelled() {
                match self.read_new(&shutdown).await {
                    Ok(report) => round.merge(report),
                    Err(e) => result = Err(e),
                }
            }

            let delay = match result {
                Err(e) => {
                    self.stats.log_errors.fetch_add(1, Ordering::Relaxed);
                    let delay = backoff.next_delay();
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "Event log unavailable, backing off");
                    Some(delay)
                }
                Ok(()) if round.degraded() => {
                    let delay = backoff.next_delay();
                    warn!(?round, delay_ms = delay.as_millis() as u64, "Round degraded, backing off");
                    Some(delay)
                }
                Ok(()) => {
                    backoff.reset();
                    None
                }
            };

            if let Some(delay) = delay {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        info!(
            consumer = %self.config.consumer,
            stats = ?self.stats.snapshot(),
            "Reconciler stopped"
        );
    }

    /// Walk the pending ledger from the cursor, up to `reclaim_max_pages`
    /// pages or the end of the ledger, processing whatever could be claimed.
    pub async fn reclaim_pass(&self, shutdown: &CancellationToken) -> Result<RoundReport, ReconcileError> {
        let mut report = RoundReport::default();
        for _ in 0..self.config.reclaim_max_pages.max(1) {
            let (page_report, wrapped) = self.reclaim_page(shutdown).await?;
            report.merge(page_report);
            if wrapped || shutdown.is_cancelled() {
                break;
            }
        }
        Ok(report)
    }

    /// Inspect one page of the pending ledger. Returns whether the page
    /// reached the end of the ledger.
    async fn reclaim_page(&self, shutdown: &CancellationToken) -> Result<(RoundReport, bool), ReconcileError> {
        let cursor = *self.cursor();
        let range = PendingRange {
            after: cursor,
            count: self.config.reclaim_page,
            consumer: None,
        };
        let page = self
            .log
            .list_pending(&self.config.stream, &self.config.group, range)
            .await?;

        // A short page means the end of the ledger: start over next time.
        let wrapped = page.len() < self.config.reclaim_page;
        *self.cursor() = if wrapped { None } else { page.last().map(|p| p.id) };

        let idle: Vec<EntryId> = page
            .iter()
            .filter(|p| p.idle >= self.config.min_idle)
            .map(|p| p.id)
            .collect();
        if idle.is_empty() {
            return Ok((RoundReport::default(), wrapped));
        }

        let claimed = self
            .log
            .claim(
                &self.config.stream,
                &self.config.group,
                &self.config.consumer,
                &idle,
                self.config.min_idle,
            )
            .await?;
        if !claimed.is_empty() {
            info!(claimed = claimed.len(), inspected = page.len(), "Reclaimed idle pending entries");
        }

        let mut report = self.process_all(&claimed, shutdown).await;
        report.claimed = claimed.len() as u64;
        self.stats.add(&report);
        Ok((report, wrapped))
    }

    /// Read and process one batch of never-delivered entries.
    pub async fn read_new(&self, shutdown: &CancellationToken) -> Result<RoundReport, ReconcileError> {
        let read = self.log.read_group_new(
            &self.config.stream,
            &self.config.group,
            &self.config.consumer,
            self.config.batch_size,
            Some(self.config.block),
        );
        let entries = tokio::select! {
            _ = shutdown.cancelled() => return Ok(RoundReport::default()),
            entries = read => entries?,
        };

        let mut report = self.process_all(&entries, shutdown).await;
        report.delivered = entries.len() as u64;
        self.stats.add(&report);
        Ok(report)
    }

    async fn process_all(&self, entries: &[StreamEntry], shutdown: &CancellationToken) -> RoundReport {
        let mut report = RoundReport::default();
        for entry in entries {
            if shutdown.is_cancelled() {
                debug!(entry_id = %entry.id, "Shutdown requested, leaving remaining entries pending");
                break;
            }
            report.record(&self.process(entry).await);
        }
        report
    }

    /// Parse, persist and acknowledge one entry.
    pub async fn process(&self, entry: &StreamEntry) -> EntryOutcome {
        let vote = match VoteEvent::from_fields(&entry.fields) {
            Ok(vote) => vote,
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "Malformed vote entry left pending");
                return EntryOutcome::ParseFailed;
            }
        };

        if let Err(e) = self.store.upsert(&vote).await {
            let failure = PersistFailure {
                vote_id: vote.vote_id.to_string(),
                reason: e.to_string(),
            };
            error!(entry_id = %entry.id, %failure, "Vote not persisted, entry left pending");
            return EntryOutcome::PersistFailed(failure);
        }

        match self
            .log
            .ack(&self.config.stream, &self.config.group, &[entry.id])
            .await
        {
            Ok(_) => {
                debug!(entry_id = %entry.id, vote_id = %vote.vote_id, "Vote reconciled");
                EntryOutcome::Acked
            }
            Err(e) => {
                warn!(entry_id = %entry.id, vote_id = %vote.vote_id, error = %e, "Ack failed after persist");
                EntryOutcome::AckFailed
            }
        }
    }

    fn cursor(&self) -> std::sync::MutexGuard<'_, Option<EntryId>> {
        self.reclaim_cursor.lock().unwrap_or_else(|p| p.into_inner())
    }
}
