//! The broadcast hub.
//!
//! The hub is the sole authority over the connection registry and the
//! topic subscriber index. Both maps live behind one lock so that no
//! mutation is ever observed half-applied, and the index stays consistent
//! with each connection's own subscription set.
//!
//! Delivery is non-blocking: `publish` enqueues onto each subscriber's
//! bounded outbound queue with `try_send`. A subscriber whose queue is full
//! cannot keep up and is forcibly unregistered so it never stalls delivery
//! to healthy subscribers.

use crate::connection::ConnectionId;
use crate::topic::{validate_topic, TopicId};
use bytes::Bytes;
use matchcast_protocol::{codec, Envelope};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// Invalid topic name.
    #[error("Invalid topic name: {0}")]
    InvalidTopic(&'static str),

    /// Connection is not registered.
    #[error("Connection not registered")]
    NotRegistered,

    /// Maximum subscriptions reached.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
    /// Maximum subscriptions per connection.
    pub max_subscriptions_per_connection: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            max_subscriptions_per_connection: 64,
        }
    }
}

/// Registry entry for one live connection.
///
/// The hub holds the only sender for the connection's outbound queue, so
/// removing the entry closes the queue exactly once; the write loop observes
/// the close and exits. The entry's `topics` set is the connection's own
/// subscription view, the topic index mirrors it.
struct ConnectionEntry {
    outbound: mpsc::Sender<Bytes>,
    topics: HashSet<TopicId>,
}

/// Registry and subscriber index, guarded as one unit.
#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    topics: HashMap<TopicId, HashSet<ConnectionId>>,
}

impl HubState {
    /// Remove a connection and every index entry that references it.
    ///
    /// Idempotent: both the read-loop exit path and the publish overflow
    /// path converge here without coordination.
    fn remove_connection(&mut self, id: &ConnectionId) -> bool {
        let Some(entry) = self.connections.remove(id) else {
            return false;
        };

        for topic in &entry.topics {
            if let Some(subscribers) = self.topics.get_mut(topic) {
                subscribers.remove(id);
                if subscribers.is_empty() {
                    self.topics.remove(topic);
                    debug!(topic = %topic, "Removed empty topic");
                }
            }
        }

        true
    }
}

/// The central broadcast hub.
///
/// One instance per process, shared behind an `Arc`. All five mutating
/// operations (`register`, `unregister`, `subscribe`, `unsubscribe`,
/// `publish`) are totally ordered by the write lock; queries take the read
/// lock so they never observe a half-applied mutation.
pub struct Hub {
    state: RwLock<HubState>,
    config: HubConfig,
}

impl Hub {
    /// Create a new hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a new hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            state: RwLock::new(HubState::default()),
            config,
        }
    }

    /// Register a new connection.
    ///
    /// Creates the connection's bounded outbound queue and returns its id
    /// together with the receiving half for the write loop. A fresh
    /// connection has no subscriptions.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Bytes>) {
        let id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity);

        let mut state = self.state.write();
        state.connections.insert(
            id.clone(),
            ConnectionEntry {
                outbound: tx,
                topics: HashSet::new(),
            },
        );

        debug!(connection = %id, total = state.connections.len(), "Connection registered");
        (id, rx)
    }

    /// Unregister a connection.
    ///
    /// Removes it from the registry and from every topic it was subscribed
    /// to, dropping topic entries that become empty. Closes the outbound
    /// queue by dropping its only sender. Calling this on a connection that
    /// is not registered is a no-op.
    ///
    /// Returns `true` if the connection was registered.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let mut state = self.state.write();
        let removed = state.remove_connection(id);
        if removed {
            debug!(connection = %id, total = state.connections.len(), "Connection unregistered");
        }
        removed
    }

    /// Subscribe a connection to a topic.
    ///
    /// Creates the topic entry on demand. Subscribing to a topic the
    /// connection is already subscribed to is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic name is invalid, the connection is not
    /// registered, or the subscription limit is reached.
    pub fn subscribe(&self, id: &ConnectionId, topic: &str) -> Result<(), HubError> {
        validate_topic(topic).map_err(HubError::InvalidTopic)?;

        let mut state = self.state.write();
        let entry = state
            .connections
            .get_mut(id)
            .ok_or(HubError::NotRegistered)?;

        if entry.topics.contains(topic) {
            return Ok(());
        }
        if entry.topics.len() >= self.config.max_subscriptions_per_connection {
            return Err(HubError::MaxSubscriptionsReached);
        }

        entry.topics.insert(topic.to_string());
        let subscribers = state.topics.entry(topic.to_string()).or_default();
        subscribers.insert(id.clone());

        debug!(
            topic = %topic,
            connection = %id,
            subscribers = subscribers.len(),
            "Subscribed"
        );
        Ok(())
    }

    /// Unsubscribe a connection from a topic.
    ///
    /// Removes the topic entry if it becomes empty. Unsubscribing from a
    /// topic the connection is not subscribed to is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not registered.
    pub fn unsubscribe(&self, id: &ConnectionId, topic: &str) -> Result<(), HubError> {
        let mut state = self.state.write();
        let entry = state
            .connections
            .get_mut(id)
            .ok_or(HubError::NotRegistered)?;

        if !entry.topics.remove(topic) {
            return Ok(());
        }

        if let Some(subscribers) = state.topics.get_mut(topic) {
            subscribers.remove(id);
            if subscribers.is_empty() {
                state.topics.remove(topic);
                debug!(topic = %topic, "Removed empty topic");
            }
        }

        debug!(topic = %topic, connection = %id, "Unsubscribed");
        Ok(())
    }

    /// Publish an envelope to every subscriber of a topic.
    ///
    /// The envelope is serialized once and the bytes shared across all
    /// subscribers. Enqueueing is non-blocking; a subscriber whose queue is
    /// full is forcibly unregistered. Serialization failure abandons this
    /// publish only.
    ///
    /// Returns the number of subscribers the envelope was enqueued for.
    pub fn publish(&self, topic: &str, envelope: &Envelope) -> usize {
        let frame = match codec::encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!(topic = %topic, error = %e, "Failed to encode envelope, dropping publish");
                return 0;
            }
        };

        let mut state = self.state.write();
        let Some(subscribers) = state.topics.get(topic) else {
            trace!(topic = %topic, "Publish to topic with no subscribers");
            return 0;
        };

        let targets: Vec<ConnectionId> = subscribers.iter().cloned().collect();
        let delivered = deliver(&mut state, &targets, &frame);
        trace!(topic = %topic, recipients = delivered, "Published");
        delivered
    }

    /// Broadcast an envelope to every registered connection.
    ///
    /// Same delivery path as [`publish`](Self::publish), iterating the
    /// whole registry instead of one topic's subscriber set.
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        let frame = match codec::encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to encode envelope, dropping broadcast");
                return 0;
            }
        };

        let mut state = self.state.write();
        let targets: Vec<ConnectionId> = state.connections.keys().cloned().collect();
        let delivered = deliver(&mut state, &targets, &frame);
        trace!(recipients = delivered, "Broadcast");
        delivered
    }

    /// Send an envelope to one specific connection.
    ///
    /// Used for directed replies (error, status, pong). Applies the same
    /// overflow policy as fan-out delivery.
    ///
    /// Returns `true` if the envelope was enqueued.
    pub fn send_to(&self, id: &ConnectionId, envelope: &Envelope) -> bool {
        let frame = match codec::encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!(connection = %id, error = %e, "Failed to encode envelope");
                return false;
            }
        };

        let mut state = self.state.write();
        deliver(&mut state, std::slice::from_ref(id), &frame) == 1
    }

    /// Get the number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Get the subscriber count for a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .read()
            .topics
            .get(topic)
            .map_or(0, HashSet::len)
    }

    /// Check if a connection is subscribed to a topic.
    #[must_use]
    pub fn is_subscribed(&self, id: &ConnectionId, topic: &str) -> bool {
        self.state
            .read()
            .connections
            .get(id)
            .is_some_and(|e| e.topics.contains(topic))
    }

    /// Get all topic names with at least one subscriber.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        self.state.read().topics.keys().cloned().collect()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let state = self.state.read();
        HubStats {
            connections: state.connections.len(),
            topics: state.topics.len(),
            total_subscriptions: state.connections.values().map(|e| e.topics.len()).sum(),
        }
    }

    /// Shut the hub down.
    ///
    /// Drops every registered connection, closing every outbound queue so
    /// each write loop exits and closes its transport.
    pub fn shutdown(&self) {
        let mut state = self.state.write();
        let count = state.connections.len();
        state.connections.clear();
        state.topics.clear();
        info!(connections = count, "Hub shut down");
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let state = self.state.read();
        for (topic, subscribers) in &state.topics {
            assert!(!subscribers.is_empty(), "empty topic entry persisted");
            for id in subscribers {
                let entry = state.connections.get(id).expect("index references gone connection");
                assert!(entry.topics.contains(topic), "index ahead of local set");
            }
        }
        for (id, entry) in &state.connections {
            for topic in &entry.topics {
                let subscribers = state.topics.get(topic).expect("local set ahead of index");
                assert!(subscribers.contains(id), "local set ahead of index");
            }
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Enqueue a frame onto each target's outbound queue.
///
/// Runs under the hub write lock so fan-out order matches publish order.
/// A target whose queue is full is removed from the registry on the spot.
fn deliver(state: &mut HubState, targets: &[ConnectionId], frame: &Bytes) -> usize {
    let mut delivered = 0;

    for id in targets {
        let Some(entry) = state.connections.get(id) else {
            continue;
        };

        match entry.outbound.try_send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                warn!(connection = %id, "Outbound queue full, dropping slow consumer");
                state.remove_connection(id);
            }
            Err(TrySendError::Closed(_)) => {
                // Write loop already gone; finish the cleanup.
                state.remove_connection(id);
            }
        }
    }

    delivered
}

/// Hub statistics.
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Number of registered connections.
    pub connections: usize,
    /// Number of topics with at least one subscriber.
    pub topics: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchcast_protocol::EnvelopeKind;
    use serde_json::json;

    fn event(topic: &str, n: u64) -> Envelope {
        Envelope::event(topic, "tick", json!({ "n": n }))
    }

    #[test]
    fn test_register_unregister() {
        let hub = Hub::new();

        let (id, _rx) = hub.register();
        assert_eq!(hub.connection_count(), 1);

        assert!(hub.unregister(&id));
        assert_eq!(hub.connection_count(), 0);

        // Second call is a no-op
        assert!(!hub.unregister(&id));
        hub.assert_consistent();
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let hub = Hub::new();
        let (id, _rx) = hub.register();

        hub.subscribe(&id, "match-1").unwrap();
        hub.subscribe(&id, "match-1").unwrap();
        assert_eq!(hub.subscriber_count("match-1"), 1);

        // One unsubscribe fully removes the subscription
        hub.unsubscribe(&id, "match-1").unwrap();
        assert!(!hub.is_subscribed(&id, "match-1"));
        assert_eq!(hub.subscriber_count("match-1"), 0);
        assert!(hub.topic_names().is_empty());
        hub.assert_consistent();
    }

    #[test]
    fn test_unsubscribe_never_subscribed() {
        let hub = Hub::new();
        let (id, _rx) = hub.register();

        hub.unsubscribe(&id, "match-1").unwrap();
        hub.assert_consistent();
    }

    #[test]
    fn test_subscribe_requires_registration() {
        let hub = Hub::new();
        let (id, _rx) = hub.register();
        hub.unregister(&id);

        assert!(matches!(
            hub.subscribe(&id, "match-1"),
            Err(HubError::NotRegistered)
        ));
    }

    #[test]
    fn test_invalid_topic() {
        let hub = Hub::new();
        let (id, _rx) = hub.register();

        assert!(matches!(
            hub.subscribe(&id, ""),
            Err(HubError::InvalidTopic(_))
        ));
    }

    #[test]
    fn test_max_subscriptions() {
        let hub = Hub::with_config(HubConfig {
            max_subscriptions_per_connection: 2,
            ..Default::default()
        });
        let (id, _rx) = hub.register();

        hub.subscribe(&id, "match-1").unwrap();
        hub.subscribe(&id, "match-2").unwrap();
        assert!(matches!(
            hub.subscribe(&id, "match-3"),
            Err(HubError::MaxSubscriptionsReached)
        ));
    }

    #[test]
    fn test_unregister_cleans_index() {
        let hub = Hub::new();
        let (a, _rx_a) = hub.register();
        let (b, _rx_b) = hub.register();

        hub.subscribe(&a, "match-1").unwrap();
        hub.subscribe(&a, "match-2").unwrap();
        hub.subscribe(&b, "match-1").unwrap();

        hub.unregister(&a);

        assert_eq!(hub.subscriber_count("match-1"), 1);
        assert_eq!(hub.subscriber_count("match-2"), 0);
        assert_eq!(hub.topic_names(), vec!["match-1".to_string()]);
        hub.assert_consistent();
    }

    #[tokio::test]
    async fn test_publish_isolation() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();

        hub.subscribe(&a, "match-1").unwrap();
        hub.subscribe(&b, "match-2").unwrap();

        let count = hub.publish("match-1", &event("match-1", 1));
        assert_eq!(count, 1);

        let frame = rx_a.try_recv().unwrap();
        let envelope = codec::decode(&frame).unwrap();
        assert_eq!(envelope.kind(), EnvelopeKind::Event);
        assert_eq!(envelope.match_id(), Some("match-1"));

        // B subscribed to a different topic and receives nothing
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_ordering() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.register();
        hub.subscribe(&a, "match-1").unwrap();

        hub.publish("match-1", &event("match-1", 1));
        hub.publish("match-1", &event("match-1", 2));

        for expected in 1..=2u64 {
            let frame = rx_a.recv().await.unwrap();
            let envelope = codec::decode(&frame).unwrap();
            let Envelope::Event { data, .. } = envelope else {
                panic!("expected event");
            };
            assert_eq!(data["n"], expected);
        }
    }

    #[tokio::test]
    async fn test_slow_consumer_dropped_healthy_unaffected() {
        let hub = Hub::with_config(HubConfig {
            outbound_capacity: 4,
            ..Default::default()
        });
        let (stalled, mut rx_stalled) = hub.register();
        let (healthy, mut rx_healthy) = hub.register();

        hub.subscribe(&stalled, "match-1").unwrap();
        hub.subscribe(&healthy, "match-1").unwrap();

        // The stalled connection never drains; the healthy one drains each round.
        for n in 0..10 {
            hub.publish("match-1", &event("match-1", n));
            let frame = rx_healthy.recv().await.unwrap();
            let envelope = codec::decode(&frame).unwrap();
            let Envelope::Event { data, .. } = envelope else {
                panic!("expected event");
            };
            assert_eq!(data["n"], n);
        }

        // Stalled overflowed at the fifth publish and was force-unregistered.
        assert_eq!(hub.subscriber_count("match-1"), 1);
        assert_eq!(hub.connection_count(), 1);
        assert!(hub.is_subscribed(&healthy, "match-1"));
        hub.assert_consistent();

        // Its queue holds the buffered frames, then reports closed.
        for _ in 0..4 {
            assert!(rx_stalled.recv().await.is_some());
        }
        assert!(rx_stalled.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_backpressure_at_default_capacity() {
        let hub = Hub::new();
        let (a, _rx_a) = hub.register();
        hub.subscribe(&a, "match-123").unwrap();

        // 300 rapid publishes against a stalled writer: the 257th enqueue
        // attempt fails and drops the connection; the rest are no-ops.
        for n in 0..300 {
            hub.publish("match-123", &event("match-123", n));
        }

        assert_eq!(hub.subscriber_count("match-123"), 0);
        assert_eq!(hub.connection_count(), 0);
        hub.assert_consistent();
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let hub = Hub::new();
        let (_a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();

        let count = hub.broadcast(&Envelope::status(json!({"state": "draining"})));
        assert_eq!(count, 2);

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_send_to() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();

        assert!(hub.send_to(&a, &Envelope::pong()));

        let frame = rx_a.try_recv().unwrap();
        assert_eq!(codec::decode(&frame).unwrap().kind(), EnvelopeKind::Pong);
        assert!(rx_b.try_recv().is_err());

        hub.unregister(&b);
        assert!(!hub.send_to(&b, &Envelope::pong()));
    }

    #[tokio::test]
    async fn test_shutdown_closes_queues() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();
        hub.subscribe(&a, "match-1").unwrap();

        hub.shutdown();

        assert_eq!(hub.connection_count(), 0);
        assert!(hub.topic_names().is_empty());
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());
    }

    #[test]
    fn test_stats() {
        let hub = Hub::new();
        let (a, _rx_a) = hub.register();
        let (b, _rx_b) = hub.register();

        hub.subscribe(&a, "match-1").unwrap();
        hub.subscribe(&a, "match-2").unwrap();
        hub.subscribe(&b, "match-1").unwrap();

        let stats = hub.stats();
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.topics, 2);
        assert_eq!(stats.total_subscriptions, 3);
    }
}
