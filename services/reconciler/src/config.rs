//! Reconciler configuration

use std::time::Duration;

use uuid::Uuid;

/// Consumer group shared by every reconciler instance.
pub const DEFAULT_GROUP: &str = "voto_group";
/// Pending entries inspected per reclaim page.
pub const DEFAULT_RECLAIM_PAGE: usize = 5;
/// Reclaim pages inspected per pass at most.
pub const DEFAULT_RECLAIM_MAX_PAGES: usize = 4;
/// Idle time after which a pending entry may be taken over.
pub const DEFAULT_MIN_IDLE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub stream: String,
    pub group: String,
    /// Unique per running instance; see [`consumer_name`].
    pub consumer: String,
    pub reclaim_page: usize,
    /// Pages a reclaim pass walks before yielding to new entries. A pass also
    /// stops at the end of the ledger.
    pub reclaim_max_pages: usize,
    pub min_idle: Duration,
    /// Maximum new entries read per round.
    pub batch_size: usize,
    /// How long a read waits for new entries before the round ends.
    pub block: Duration,
    /// Minimum time between two reclaim passes.
    pub reclaim_interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            stream: "voto_stream".to_string(),
            group: DEFAULT_GROUP.to_string(),
            consumer: consumer_name("reconciler"),
            reclaim_page: DEFAULT_RECLAIM_PAGE,
            reclaim_max_pages: DEFAULT_RECLAIM_MAX_PAGES,
            min_idle: DEFAULT_MIN_IDLE,
            batch_size: 10,
            block: Duration::from_secs(2),
            reclaim_interval: Duration::from_secs(5),
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_secs(10),
        }
    }
}

/// Consumer identity `<prefix>-<pid>-<uuid v7>`.
///
/// Two instances never share a name, even when started in the same
/// millisecond on the same host.
pub fn consumer_name(prefix: &str) -> String {
    format!("{prefix}-{}-{}", std::process::id(), Uuid::now_v7())
}
