//! Publisher façade.
//!
//! The match engine does not talk to the hub directly; it publishes through
//! a [`Broadcaster`], which stamps envelopes and exposes read-only
//! statistics for monitoring.

use crate::hub::{Hub, HubStats};
use matchcast_protocol::Envelope;
use serde_json::Value;
use std::sync::Arc;

/// The boundary the event producer uses to reach the hub.
#[derive(Clone)]
pub struct Broadcaster {
    hub: Arc<Hub>,
}

impl Broadcaster {
    /// Create a broadcaster over a shared hub.
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Publish a match event to a topic.
    ///
    /// Builds an event envelope stamped with the current time and fans it
    /// out to the topic's subscribers. Delivery is best-effort per
    /// subscriber; the call never blocks and never fails from the
    /// producer's point of view.
    ///
    /// Returns the number of subscribers the event was enqueued for.
    pub fn publish_event(&self, match_id: &str, event: &str, data: Value) -> usize {
        self.hub.publish(match_id, &Envelope::event(match_id, event, data))
    }

    /// Broadcast a status notification to every connection.
    pub fn publish_status(&self, data: Value) -> usize {
        self.hub.broadcast(&Envelope::status(data))
    }

    /// Get the number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.hub.connection_count()
    }

    /// Get the subscriber count for a topic.
    #[must_use]
    pub fn subscriber_count(&self, match_id: &str) -> usize {
        self.hub.subscriber_count(match_id)
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        self.hub.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchcast_protocol::{codec, Envelope, EnvelopeKind};
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_event() {
        let hub = Arc::new(Hub::new());
        let broadcaster = Broadcaster::new(hub.clone());

        let (id, mut rx) = hub.register();
        hub.subscribe(&id, "match-123").unwrap();

        let count = broadcaster.publish_event("match-123", "round_start", json!({"round": 1}));
        assert_eq!(count, 1);

        let frame = rx.try_recv().unwrap();
        let envelope = codec::decode(&frame).unwrap();
        let Envelope::Event {
            match_id,
            event,
            data,
            ..
        } = envelope
        else {
            panic!("expected event");
        };
        assert_eq!(match_id, "match-123");
        assert_eq!(event, "round_start");
        assert_eq!(data["round"], 1);
    }

    #[tokio::test]
    async fn test_publish_to_empty_topic() {
        let broadcaster = Broadcaster::new(Arc::new(Hub::new()));
        assert_eq!(broadcaster.publish_event("match-9", "kickoff", json!({})), 0);
    }

    #[tokio::test]
    async fn test_status_broadcast() {
        let hub = Arc::new(Hub::new());
        let broadcaster = Broadcaster::new(hub.clone());
        let (_id, mut rx) = hub.register();

        broadcaster.publish_status(json!({"state": "halftime"}));

        let frame = rx.try_recv().unwrap();
        assert_eq!(codec::decode(&frame).unwrap().kind(), EnvelopeKind::Status);
    }

    #[test]
    fn test_stats_passthrough() {
        let hub = Arc::new(Hub::new());
        let broadcaster = Broadcaster::new(hub.clone());

        let (id, _rx) = hub.register();
        hub.subscribe(&id, "match-1").unwrap();

        assert_eq!(broadcaster.connection_count(), 1);
        assert_eq!(broadcaster.subscriber_count("match-1"), 1);
        assert_eq!(broadcaster.stats().total_subscriptions, 1);
    }
}
