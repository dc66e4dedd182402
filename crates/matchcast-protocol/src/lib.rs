//! # matchcast-protocol
//!
//! Wire protocol for the matchcast event hub.
//!
//! All communication between clients and the hub is JSON, one object per
//! WebSocket frame, tagged by a `"type"` field:
//!
//! - **Control plane** (client → hub): `subscribe`, `unsubscribe`, `ping`
//! - **Data plane** (hub → client): `event`, `status`, `error`, `pong`
//!
//! The format is append-only: new envelope kinds may be added, existing
//! shapes must not change incompatibly.

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError, MAX_MESSAGE_SIZE};
pub use envelope::{Envelope, EnvelopeKind};
