//! # matchcast-core
//!
//! Connection registry, topic subscription index, and fan-out delivery for
//! the matchcast event hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Hub** - sole authority over live connections and topic subscriptions
//! - **Broadcaster** - the façade the match engine publishes events through
//! - **ConnectionId** - opaque identity assigned to each accepted connection
//! - **Topic** - match-identifier channel names with validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐
//! │ Broadcaster │────▶│     Hub     │────▶│ outbound queues  │
//! └─────────────┘     └─────────────┘     └──────────────────┘
//!                            ▲
//!                            │ subscribe / unsubscribe
//!                     ┌─────────────┐
//!                     │  read loops │
//!                     └─────────────┘
//! ```
//!
//! Every registry and index mutation goes through the hub's single lock, so
//! register/unregister/subscribe/unsubscribe/publish never interleave
//! partially. Delivery to subscribers is strictly non-blocking: a consumer
//! whose outbound queue is full is dropped rather than allowed to stall the
//! others.

pub mod broadcaster;
pub mod connection;
pub mod hub;
pub mod topic;

pub use broadcaster::Broadcaster;
pub use connection::ConnectionId;
pub use hub::{Hub, HubConfig, HubError, HubStats};
pub use topic::{validate_topic, TopicId};
