//! Per-connection read and write loops.
//!
//! Every accepted WebSocket is split into two independent tasks: a read
//! loop that decodes control envelopes and drives hub subscriptions, and a
//! write loop that drains the connection's outbound queue and keeps the
//! peer alive with heartbeats. Either loop exiting converges on a single
//! idempotent `unregister`.

use crate::handlers::AppState;
use crate::metrics::{self, ConnectionMetricsGuard};
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use matchcast_core::ConnectionId;
use matchcast_protocol::{codec, Envelope};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, warn};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Handle one WebSocket session from accept to teardown.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (id, outbound_rx) = state.hub.register();
    debug!(connection = %id, "WebSocket connected");

    let (sink, stream) = socket.split();
    let last_seen = Arc::new(AtomicU64::new(now_millis()));

    let mut writer = tokio::spawn(write_loop(
        sink,
        outbound_rx,
        state.clone(),
        id.clone(),
        last_seen.clone(),
    ));

    // Greet the peer with its identity and the expected heartbeat cadence.
    state.hub.send_to(
        &id,
        &Envelope::status(serde_json::json!({
            "state": "connected",
            "connection_id": id.as_str(),
            "heartbeat_ms": state.config.heartbeat.interval_ms,
        })),
    );

    tokio::select! {
        () = read_loop(stream, &state, &id, &last_seen) => {
            // Dropping the registry entry closes the outbound queue; the
            // write loop drains it, sends Close, and exits on its own.
            state.hub.unregister(&id);
        }
        _ = &mut writer => {
            // Write loop exited first (heartbeat timeout or transport
            // failure). Dropping the read half tears the socket down.
            state.hub.unregister(&id);
        }
    }

    metrics::set_active_topics(state.hub.stats().topics);
    debug!(connection = %id, "WebSocket disconnected");
}

/// Drain inbound frames until the transport fails or closes.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &Arc<AppState>,
    id: &ConnectionId,
    last_seen: &Arc<AtomicU64>,
) {
    while let Some(msg) = stream.next().await {
        last_seen.store(now_millis(), Ordering::Relaxed);

        match msg {
            Ok(Message::Text(text)) => {
                if !handle_inbound(text.as_bytes(), state, id) {
                    break;
                }
            }
            Ok(Message::Binary(data)) => {
                if !handle_inbound(&data, state, id) {
                    break;
                }
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Transport-level liveness; the timestamp update above is all
                // that is needed.
            }
            Ok(Message::Close(_)) => {
                debug!(connection = %id, "Received close frame");
                break;
            }
            Err(e) => {
                warn!(connection = %id, error = %e, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
        }
    }
}

/// Process one inbound payload.
///
/// Decode failures and invalid requests are answered with an error envelope
/// and the connection stays alive. Returns `false` once replies can no
/// longer be enqueued, meaning the connection is gone from the registry.
fn handle_inbound(payload: &[u8], state: &Arc<AppState>, id: &ConnectionId) -> bool {
    let start = Instant::now();
    metrics::record_message(payload.len(), "inbound");

    if payload.len() > state.config.limits.max_message_size {
        metrics::record_error("oversized");
        return state.hub.send_to(id, &Envelope::error("message too large"));
    }

    let envelope = match codec::decode(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(connection = %id, error = %e, "Malformed message");
            metrics::record_error("decode");
            return state.hub.send_to(id, &Envelope::error(format!("malformed message: {e}")));
        }
    };

    let alive = match envelope {
        Envelope::Subscribe { match_id: None } => state
            .hub
            .send_to(id, &Envelope::error("subscribe requires match_id")),

        Envelope::Subscribe {
            match_id: Some(topic),
        } => {
            let reply = match state.hub.subscribe(id, &topic) {
                Ok(()) => {
                    metrics::record_subscription();
                    metrics::set_active_topics(state.hub.stats().topics);
                    Envelope::status_for(topic.as_str(), serde_json::json!({"state": "subscribed"}))
                }
                Err(e) => {
                    warn!(connection = %id, topic = %topic, error = %e, "Subscribe failed");
                    Envelope::error(e.to_string())
                }
            };
            state.hub.send_to(id, &reply)
        }

        Envelope::Unsubscribe { match_id: None } => state
            .hub
            .send_to(id, &Envelope::error("unsubscribe requires match_id")),

        Envelope::Unsubscribe {
            match_id: Some(topic),
        } => {
            let reply = match state.hub.unsubscribe(id, &topic) {
                Ok(()) => {
                    metrics::set_active_topics(state.hub.stats().topics);
                    Envelope::status_for(topic.as_str(), serde_json::json!({"state": "unsubscribed"}))
                }
                Err(e) => Envelope::error(e.to_string()),
            };
            state.hub.send_to(id, &reply)
        }

        Envelope::Ping => state.hub.send_to(id, &Envelope::pong()),

        other => {
            debug!(connection = %id, kind = %other.kind(), "Unexpected message kind");
            state
                .hub
                .send_to(id, &Envelope::error(format!("unexpected message type: {}", other.kind())))
        }
    };

    metrics::record_latency(start.elapsed().as_secs_f64());
    alive
}

/// Drain the outbound queue into the socket and keep the peer alive.
///
/// Writes are coalesced: whenever the queue holds more than one frame, the
/// extras are fed into the sink and flushed together. On a fixed interval a
/// transport ping is sent if nothing else was written; a peer silent for
/// longer than the timeout is treated as dead.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
    state: Arc<AppState>,
    id: ConnectionId,
    last_seen: Arc<AtomicU64>,
) {
    let period = Duration::from_millis(state.config.heartbeat.interval_ms);
    let timeout_ms = state.config.heartbeat.timeout_ms;
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut wrote_since_tick = false;

    loop {
        tokio::select! {
            maybe = rx.recv() => {
                match maybe {
                    Some(frame) => {
                        if write_batch(&mut sink, frame, &mut rx).await.is_err() {
                            warn!(connection = %id, "Write failed");
                            break;
                        }
                        wrote_since_tick = true;
                    }
                    None => {
                        // Queue closed: unregistered or hub shutdown.
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                let idle = now_millis().saturating_sub(last_seen.load(Ordering::Relaxed));
                if idle > timeout_ms {
                    warn!(connection = %id, idle_ms = idle, "Peer silent past deadline, closing");
                    break;
                }
                if !wrote_since_tick && sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                wrote_since_tick = false;
            }
        }
    }

    state.hub.unregister(&id);
}

/// Write one frame plus anything else already queued, with a single flush.
async fn write_batch(
    sink: &mut SplitSink<WebSocket, Message>,
    first: Bytes,
    rx: &mut mpsc::Receiver<Bytes>,
) -> Result<(), axum::Error> {
    metrics::record_message(first.len(), "outbound");
    sink.feed(to_message(first)).await?;

    while let Ok(frame) = rx.try_recv() {
        metrics::record_message(frame.len(), "outbound");
        sink.feed(to_message(frame)).await?;
    }

    sink.flush().await
}

fn to_message(frame: Bytes) -> Message {
    // Frames are serde_json output and therefore valid UTF-8.
    Message::Text(String::from_utf8_lossy(&frame).into_owned())
}
