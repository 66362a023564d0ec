//! Ingestion Publisher
//!
//! Turns one accepted vote submission into a log entry, a counter increment
//! and a fresh totals broadcast, in that order. Nothing after the append runs
//! when the append fails.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use persistence::stream::EventLog;
use tracing::{debug, error, info};
use vote_types::clock::Clock;
use vote_types::errors::AppendFailure;
use vote_types::ids::CandidateId;
use vote_types::vote::VoteEvent;

use crate::broadcast::BroadcastHub;
use crate::counters::AggregateCounters;
use crate::registry::CandidateRegistry;

/// Stream every vote is appended to.
pub const DEFAULT_STREAM: &str = "voto_stream";
/// Broadcast channel carrying totals snapshots.
pub const DEFAULT_CHANNEL: &str = "votacao_atualizada";

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub stream: String,
    pub channel: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
        }
    }
}

pub struct VotePublisher {
    log: Arc<dyn EventLog>,
    counters: Arc<AggregateCounters>,
    registry: Arc<CandidateRegistry>,
    hub: BroadcastHub,
    clock: Arc<dyn Clock>,
    config: PublisherConfig,
    /// Serializes increment, snapshot and send so subscribers never see an
    /// older snapshot after a newer one.
    publish_lock: Mutex<()>,
}

impl VotePublisher {
    pub fn new(
        log: Arc<dyn EventLog>,
        counters: Arc<AggregateCounters>,
        registry: Arc<CandidateRegistry>,
        hub: BroadcastHub,
        clock: Arc<dyn Clock>,
        config: PublisherConfig,
    ) -> Self {
        info!(stream = %config.stream, channel = %config.channel, "Vote publisher initialized");
        Self {
            log,
            counters,
            registry,
            hub,
            clock,
            config,
            publish_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Accept one vote for `candidate_id`.
    ///
    /// Succeeds once the log has the entry. Candidate existence is not
    /// checked here.
    pub async fn submit_vote(&self, candidate_id: CandidateId) -> Result<VoteEvent, AppendFailure> {
        let vote = VoteEvent::mint(candidate_id, self.clock.now_millis());

        let entry_id = self
            .log
            .append(&self.config.stream, vote.to_fields())
            .await
            .map_err(|e| {
                error!(vote_id = %vote.vote_id, candidate_id = %candidate_id, error = %e, "Vote append failed");
                AppendFailure {
                    stream: self.config.stream.clone(),
                    reason: e.to_string(),
                }
            })?;

        let reached = {
            let _guard = self.publish_lock.lock().unwrap_or_else(|p| p.into_inner());
            let count = self.counters.increment(candidate_id);
            debug!(candidate_id = %candidate_id, count, "Counter incremented");
            self.broadcast_totals()
        };

        info!(
            vote_id = %vote.vote_id,
            candidate_id = %candidate_id,
            entry_id = %entry_id,
            time_bucket = %vote.time_bucket,
            subscribers = reached,
            "Vote accepted"
        );
        Ok(vote)
    }

    /// Current totals keyed by candidate display name.
    ///
    /// Candidates without a registered name are left out; candidates sharing
    /// a display name are summed.
    pub fn current_totals(&self) -> BTreeMap<String, u64> {
        let mut totals = BTreeMap::new();
        for (candidate_id, count) in self.counters.snapshot_all() {
            if let Some(name) = self.registry.display_name(candidate_id) {
                *totals.entry(name).or_insert(0) += count;
            }
        }
        totals
    }

    /// Current totals as a flat JSON object.
    pub fn totals_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.current_totals())
    }

    fn broadcast_totals(&self) -> usize {
        match self.totals_payload() {
            Ok(payload) => self.hub.publish(&self.config.channel, payload),
            Err(e) => {
                error!(error = %e, "Failed to serialize totals");
                0
            }
        }
    }
}
