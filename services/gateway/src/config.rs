use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use persistence::journal::JournalConfig;
use reconciler::{consumer_name, ReconcilerConfig};
use tally::publisher::{PublisherConfig, DEFAULT_CHANNEL, DEFAULT_STREAM};

/// Command-line arguments for the vote gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "gateway")]
#[command(about = "Vote ingestion gateway with live tally and background reconciliation")]
#[command(version)]
pub struct Config {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080", env = "VOTE_LISTEN_ADDR")]
    pub listen: SocketAddr,

    /// Directory holding the event log, vote store and candidate journals
    #[arg(long, default_value = "./data", env = "VOTE_DATA_DIR")]
    pub data_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_STREAM, env = "VOTE_STREAM")]
    pub stream: String,

    #[arg(long, default_value = reconciler::config::DEFAULT_GROUP, env = "VOTE_GROUP")]
    pub group: String,

    /// Broadcast channel for totals snapshots
    #[arg(long, default_value = DEFAULT_CHANNEL, env = "VOTE_CHANNEL")]
    pub channel: String,

    /// Prefix of this instance's consumer name
    #[arg(long, default_value = "reconciler", env = "VOTE_CONSUMER_PREFIX")]
    pub consumer_prefix: String,

    #[arg(long, default_value_t = 5, env = "VOTE_RECLAIM_PAGE")]
    pub reclaim_page: usize,

    /// Reclaim pages walked per pass at most
    #[arg(long, default_value_t = 4, env = "VOTE_RECLAIM_MAX_PAGES")]
    pub reclaim_max_pages: usize,

    /// Seconds a pending entry must sit idle before another consumer takes it
    #[arg(long, default_value_t = 300, env = "VOTE_MIN_IDLE_SECS")]
    pub min_idle_secs: u64,

    #[arg(long, default_value_t = 10, env = "VOTE_BATCH_SIZE")]
    pub batch_size: usize,

    #[arg(long, default_value_t = 2_000, env = "VOTE_BLOCK_MS")]
    pub block_ms: u64,

    #[arg(long, default_value_t = 5_000, env = "VOTE_RECLAIM_INTERVAL_MS")]
    pub reclaim_interval_ms: u64,

    #[arg(long, default_value_t = 100, env = "VOTE_BACKOFF_INITIAL_MS")]
    pub backoff_initial_ms: u64,

    #[arg(long, default_value_t = 10_000, env = "VOTE_BACKOFF_MAX_MS")]
    pub backoff_max_ms: u64,

    /// Payloads buffered per live subscriber
    #[arg(long, default_value_t = tally::broadcast::DEFAULT_CAPACITY, env = "VOTE_HUB_CAPACITY")]
    pub hub_capacity: usize,
}

impl Config {
    pub fn log_journal(&self) -> JournalConfig {
        JournalConfig::new(self.data_dir.join("log"))
    }

    pub fn store_journal(&self) -> JournalConfig {
        JournalConfig::new(self.data_dir.join("votes"))
    }

    pub fn candidate_journal(&self) -> JournalConfig {
        JournalConfig::new(self.data_dir.join("candidates"))
    }

    pub fn publisher(&self) -> PublisherConfig {
        PublisherConfig {
            stream: self.stream.clone(),
            channel: self.channel.clone(),
        }
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            stream: self.stream.clone(),
            group: self.group.clone(),
            consumer: consumer_name(&self.consumer_prefix),
            reclaim_page: self.reclaim_page.max(1),
            reclaim_max_pages: self.reclaim_max_pages.max(1),
            min_idle: Duration::from_secs(self.min_idle_secs),
            batch_size: self.batch_size.max(1),
            block: Duration::from_millis(self.block_ms),
            reclaim_interval: Duration::from_millis(self.reclaim_interval_ms),
            backoff_initial: Duration::from_millis(self.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}
