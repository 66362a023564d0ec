//! Broadcast Hub: fan-out of totals snapshots to live subscribers
//!
//! Named channels over `tokio::sync::broadcast`. Publishing never blocks and
//! never fails the publisher: with no subscribers the payload is simply
//! dropped. Subscribers only see payloads published after they subscribed.
//!
//! A subscriber that falls more than `capacity` payloads behind loses the
//! oldest ones and continues from what is still buffered. Every payload is a
//! full snapshot, so nothing is lost that a later payload does not repeat.

use std::fmt::Display;
use std::sync::Arc;

use dashmap::DashMap;
use futures::{Sink, SinkExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use vote_types::errors::TransportFailure;

/// Payloads buffered per channel for slow subscribers.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct BroadcastHub {
    channels: Arc<DashMap<String, broadcast::Sender<Arc<str>>>>,
    capacity: usize,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        info!(capacity, "Broadcast hub initialized");
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Send `payload` to every current subscriber of `channel`.
    ///
    /// Returns the number of subscribers reached.
    pub fn publish(&self, channel: &str, payload: impl Into<Arc<str>>) -> usize {
        let Some(tx) = self.channels.get(channel) else {
            return 0;
        };
        let reached = tx.send(payload.into()).unwrap_or(0);
        debug!(channel, reached, "Published payload");
        reached
    }

    pub fn subscribe(&self, channel: &str) -> Subscription {
        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Subscription {
            channel: channel.to_string(),
            rx,
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |tx| tx.receiver_count())
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One subscriber's view of a channel.
pub struct Subscription {
    channel: String,
    rx: broadcast::Receiver<Arc<str>>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next payload, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Subscriber lagged, skipping payloads");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Why a relay stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEnd {
    /// The hub was dropped.
    HubClosed,
    /// Writing to the connection failed.
    Transport(TransportFailure),
}

/// Forward every payload of `subscription` into `sink` until either side
/// goes away. Only this relay is affected when the sink fails.
pub async fn relay<S>(mut subscription: Subscription, mut sink: S) -> RelayEnd
where
    S: Sink<String> + Unpin,
    S::Error: Display,
{
    let mut forwarded = 0u64;
    while let Some(payload) = subscription.recv().await {
        if let Err(e) = sink.send(payload.to_string()).await {
            let failure = TransportFailure {
                reason: e.to_string(),
            };
            debug!(channel = subscription.channel(), forwarded, %failure, "Relay ended");
            return RelayEnd::Transport(failure);
        }
        forwarded += 1;
    }
    RelayEnd::HubClosed
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn test_publish_without_subscribers_reaches_nobody() {
        let hub = BroadcastHub::default();
        assert_eq!(hub.publish("votes", "{}"), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_every_payload() {
        let hub = BroadcastHub::default();
        let mut first = hub.subscribe("votes");
        let mut second = hub.subscribe("votes");
        assert_eq!(hub.subscriber_count("votes"), 2);

        assert_eq!(hub.publish("votes", "a"), 2);
        assert_eq!(hub.publish("votes", "b"), 2);

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.recv().await.as_deref(), Some("a"));
            assert_eq!(sub.recv().await.as_deref(), Some("b"));
        }
    }

    #[tokio::test]
    async fn test_no_replay_of_history() {
        let hub = BroadcastHub::default();
        let _early = hub.subscribe("votes");
        hub.publish("votes", "before");

        let mut late = hub.subscribe("votes");
        hub.publish("votes", "after");
        assert_eq!(late.recv().await.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let hub = BroadcastHub::default();
        let mut other = hub.subscribe("other");
        hub.subscribe("votes");
        hub.publish("votes", "x");

        let got = tokio::time::timeout(Duration::from_millis(20), other.recv()).await;
        assert!(got.is_err());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_keeps_receiving() {
        let hub = BroadcastHub::new(2);
        let mut sub = hub.subscribe("votes");
        for p in ["1", "2", "3", "4"] {
            hub.publish("votes", p);
        }
        assert_eq!(sub.recv().await.as_deref(), Some("3"));
        assert_eq!(sub.recv().await.as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn test_relay_forwards_payloads() {
        let hub = BroadcastHub::default();
        let (tx, mut rx) = mpsc::unbounded::<String>();
        let handle = tokio::spawn(relay(hub.subscribe("votes"), tx));

        hub.publish("votes", r#"{"Alice":1}"#);
        assert_eq!(rx.next().await.as_deref(), Some(r#"{"Alice":1}"#));

        drop(hub);
        assert_eq!(handle.await.unwrap(), RelayEnd::HubClosed);
    }

    #[tokio::test]
    async fn test_dead_connection_ends_only_its_relay() {
        let hub = BroadcastHub::default();
        let (dead_tx, dead_rx) = mpsc::unbounded::<String>();
        let (live_tx, mut live_rx) = mpsc::unbounded::<String>();
        drop(dead_rx);

        let dead = tokio::spawn(relay(hub.subscribe("votes"), dead_tx));
        let _live = tokio::spawn(relay(hub.subscribe("votes"), live_tx));

        hub.publish("votes", "one");
        assert!(matches!(dead.await.unwrap(), RelayEnd::Transport(_)));

        hub.publish("votes", "two");
        assert_eq!(live_rx.next().await.as_deref(), Some("one"));
        assert_eq!(live_rx.next().await.as_deref(), Some("two"));
        assert_eq!(hub.subscriber_count("votes"), 1);
    }
}
