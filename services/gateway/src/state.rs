use std::sync::Arc;

use tally::{BroadcastHub, CandidateRegistry, VotePublisher};

#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<VotePublisher>,
    pub registry: Arc<CandidateRegistry>,
    pub hub: BroadcastHub,
}

impl AppState {
    pub fn new(publisher: Arc<VotePublisher>, registry: Arc<CandidateRegistry>, hub: BroadcastHub) -> Self {
        Self {
            publisher,
            registry,
            hub,
        }
    }

    /// Channel live relays subscribe to.
    pub fn channel(&self) -> &str {
        &self.publisher.config().channel
    }
}
