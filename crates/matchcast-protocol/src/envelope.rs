//! Envelope types for the matchcast protocol.
//!
//! Envelopes are the fundamental unit of communication. Each envelope is a
//! single JSON object tagged by its `"type"` field and is immutable once
//! constructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Subscribe,
    Unsubscribe,
    Ping,
    Event,
    Status,
    Error,
    Pong,
}

impl EnvelopeKind {
    /// Get the wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Subscribe => "subscribe",
            EnvelopeKind::Unsubscribe => "unsubscribe",
            EnvelopeKind::Ping => "ping",
            EnvelopeKind::Event => "event",
            EnvelopeKind::Status => "status",
            EnvelopeKind::Error => "error",
            EnvelopeKind::Pong => "pong",
        }
    }
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol envelope.
///
/// Control-plane envelopes (`Subscribe`, `Unsubscribe`, `Ping`) flow from
/// clients to the hub; data-plane envelopes (`Event`, `Status`, `Error`,
/// `Pong`) flow from the hub to clients.
///
/// `match_id` is optional on subscribe/unsubscribe so that a missing field
/// decodes successfully and can be answered with an application-level error
/// reply instead of tearing the connection down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Subscribe to a match topic.
    Subscribe {
        /// Topic to subscribe to. Required; absence is an application error.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_id: Option<String>,
    },

    /// Unsubscribe from a match topic.
    Unsubscribe {
        /// Topic to unsubscribe from. Required; absence is an application error.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_id: Option<String>,
    },

    /// Application-level liveness probe.
    Ping,

    /// A match event published to a topic.
    Event {
        /// Topic this event belongs to.
        match_id: String,
        /// Event kind, e.g. `round_start`.
        event: String,
        /// Opaque event payload.
        data: Value,
        /// When the envelope was constructed.
        timestamp: DateTime<Utc>,
    },

    /// Server status notification.
    Status {
        /// Topic this status refers to, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_id: Option<String>,
        /// Status payload.
        data: Value,
        /// When the envelope was constructed.
        timestamp: DateTime<Utc>,
    },

    /// Error reply to a malformed or invalid request.
    Error {
        /// Error details, `{"message": ...}`.
        data: Value,
        /// When the envelope was constructed.
        timestamp: DateTime<Utc>,
    },

    /// Reply to an application-level ping.
    Pong {
        /// When the envelope was constructed.
        timestamp: DateTime<Utc>,
    },
}

impl Envelope {
    /// Get the envelope kind.
    #[must_use]
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Subscribe { .. } => EnvelopeKind::Subscribe,
            Envelope::Unsubscribe { .. } => EnvelopeKind::Unsubscribe,
            Envelope::Ping => EnvelopeKind::Ping,
            Envelope::Event { .. } => EnvelopeKind::Event,
            Envelope::Status { .. } => EnvelopeKind::Status,
            Envelope::Error { .. } => EnvelopeKind::Error,
            Envelope::Pong { .. } => EnvelopeKind::Pong,
        }
    }

    /// Get the topic this envelope refers to, if any.
    #[must_use]
    pub fn match_id(&self) -> Option<&str> {
        match self {
            Envelope::Subscribe { match_id } | Envelope::Unsubscribe { match_id } => {
                match_id.as_deref()
            }
            Envelope::Event { match_id, .. } => Some(match_id),
            Envelope::Status { match_id, .. } => match_id.as_deref(),
            _ => None,
        }
    }

    /// Create a new Subscribe envelope.
    #[must_use]
    pub fn subscribe(match_id: impl Into<String>) -> Self {
        Envelope::Subscribe {
            match_id: Some(match_id.into()),
        }
    }

    /// Create a new Unsubscribe envelope.
    #[must_use]
    pub fn unsubscribe(match_id: impl Into<String>) -> Self {
        Envelope::Unsubscribe {
            match_id: Some(match_id.into()),
        }
    }

    /// Create a new Event envelope stamped with the current time.
    #[must_use]
    pub fn event(match_id: impl Into<String>, event: impl Into<String>, data: Value) -> Self {
        Envelope::Event {
            match_id: match_id.into(),
            event: event.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Create a new Status envelope.
    #[must_use]
    pub fn status(data: Value) -> Self {
        Envelope::Status {
            match_id: None,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Create a new Status envelope scoped to a topic.
    #[must_use]
    pub fn status_for(match_id: impl Into<String>, data: Value) -> Self {
        Envelope::Status {
            match_id: Some(match_id.into()),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Create a new Error envelope.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            data: serde_json::json!({ "message": message.into() }),
            timestamp: Utc::now(),
        }
    }

    /// Create a new Pong envelope.
    #[must_use]
    pub fn pong() -> Self {
        Envelope::Pong {
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_kind() {
        assert_eq!(Envelope::subscribe("m1").kind(), EnvelopeKind::Subscribe);
        assert_eq!(
            Envelope::event("m1", "round_start", json!({})).kind(),
            EnvelopeKind::Event
        );
        assert_eq!(Envelope::pong().kind(), EnvelopeKind::Pong);
    }

    #[test]
    fn test_event_wire_shape() {
        let env = Envelope::event("match-123", "round_start", json!({"round": 1}));
        let value = serde_json::to_value(&env).unwrap();

        assert_eq!(value["type"], "event");
        assert_eq!(value["match_id"], "match-123");
        assert_eq!(value["event"], "round_start");
        assert_eq!(value["data"]["round"], 1);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_subscribe_missing_match_id_decodes() {
        let env: Envelope = serde_json::from_str(r#"{"type":"subscribe"}"#).unwrap();
        assert_eq!(env, Envelope::Subscribe { match_id: None });
        assert!(env.match_id().is_none());
    }

    #[test]
    fn test_subscribe_ignores_extra_fields() {
        let env: Envelope =
            serde_json::from_str(r#"{"type":"subscribe","match_id":"m1","extra":42}"#).unwrap();
        assert_eq!(env.match_id(), Some("m1"));
    }

    #[test]
    fn test_unknown_type_fails_decode() {
        let result: Result<Envelope, _> = serde_json::from_str(r#"{"type":"shout"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_envelope_shape() {
        let env = Envelope::error("no match_id");
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["message"], "no match_id");
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let env = Envelope::pong();
        let value = serde_json::to_value(&env).unwrap();
        let ts = value["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
