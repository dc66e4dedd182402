//! Codec for encoding and decoding matchcast envelopes.
//!
//! Envelopes are plain JSON, one object per WebSocket frame. The transport
//! delimits messages, so no length prefix is needed.

use bytes::Bytes;
use thiserror::Error;

use crate::envelope::Envelope;

/// Maximum encoded message size (64 KiB).
///
/// Applied on the encode side only; inbound size limits are the server's
/// to enforce, since they are configurable there.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding/decoding error.
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an envelope to JSON bytes.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(envelope)?;

    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode an envelope from JSON bytes.
///
/// # Errors
///
/// Returns an error if the data is not a valid envelope.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    let envelope = serde_json::from_slice(data)?;
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode_roundtrip() {
        let envelopes = vec![
            Envelope::subscribe("match-123"),
            Envelope::unsubscribe("match-123"),
            Envelope::Ping,
            Envelope::event("match-123", "round_start", json!({"round": 1})),
            Envelope::status(json!({"state": "connected"})),
            Envelope::error("bad request"),
            Envelope::pong(),
        ];

        for envelope in envelopes {
            let encoded = encode(&envelope).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(envelope, decoded);
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode(b"not json at all"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(decode(b"{}"), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_decode_has_no_size_cap() {
        // Inbound limits are configurable at the server; the codec itself
        // decodes anything structurally valid.
        let big = "x".repeat(MAX_MESSAGE_SIZE);
        let data = serde_json::to_vec(&Envelope::event("m1", "dump", json!(big))).unwrap();
        assert!(data.len() > MAX_MESSAGE_SIZE);
        assert!(decode(&data).is_ok());
    }

    #[test]
    fn test_encode_too_large() {
        let big = "x".repeat(MAX_MESSAGE_SIZE);
        let envelope = Envelope::event("m1", "dump", json!(big));
        assert!(matches!(
            encode(&envelope),
            Err(ProtocolError::MessageTooLarge(_))
        ));
    }
}
