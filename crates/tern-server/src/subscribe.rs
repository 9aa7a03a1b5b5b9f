//! `com.atproto.label.subscribeLabels` — the per-connection fan-out
//! state machine.
//!
//! Each connection validates its cursor, replays history in bounded
//! batches, then blocks on its wake channel (or the keepalive timer)
//! and streams the live tail. Every record is signed at emission time;
//! nothing is cached, so a key rotation at the next boot takes effect
//! immediately.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tern_engine::{Labeler, LabelerError};
use tern_store::SCAN_BATCH;
use tokio::time::{Instant, interval_at, timeout};
use tracing::debug;

use crate::AppState;

/// Keepalive ping period.
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(60);
/// Deadline for any single write to the peer.
const WRITE_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
pub(crate) struct SubscribeParams {
    cursor: Option<String>,
}

/// `GET /xrpc/com.atproto.label.subscribeLabels?cursor=N`
pub(crate) async fn subscribe_labels(
    State(state): State<AppState>,
    Query(params): Query<SubscribeParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let cursor = match params.cursor.as_deref() {
        None | Some("") => None,
        Some(raw) => match raw.parse::<u64>() {
            Ok(n) => Some(n as i64),
            Err(_) => {
                debug!(cursor = raw, "bad cursor value");
                return (StatusCode::BAD_REQUEST, "bad cursor").into_response();
            }
        },
    };

    let labeler = Arc::clone(&state.labeler);
    ws.on_upgrade(move |socket| async move {
        stream_labels(labeler, socket, cursor).await;
        debug!("subscription closed");
    })
}

/// Everything that ends a stream. The first failure terminates the
/// connection; no partial frames are emitted. Transport failures are
/// logged where they happen, so only engine errors carry detail.
enum StreamEnd {
    Labeler(LabelerError),
    Socket,
    Deadline,
}

impl From<LabelerError> for StreamEnd {
    fn from(e: LabelerError) -> Self {
        Self::Labeler(e)
    }
}

impl From<tern_store::StoreError> for StreamEnd {
    fn from(e: tern_store::StoreError) -> Self {
        Self::Labeler(e.into())
    }
}

impl From<tern_codec::CodecError> for StreamEnd {
    fn from(e: tern_codec::CodecError) -> Self {
        Self::Labeler(e.into())
    }
}

async fn stream_labels(labeler: Arc<Labeler>, mut socket: WebSocket, cursor: Option<i64>) {
    // Register the wake channel before reading the log, so a write racing
    // with catch-up leaves a buffered wake instead of a gap.
    let mut sub = labeler.subscribe();

    let mut last_sent = match cursor {
        // No cursor: live tail only.
        None => match labeler.store().max_seq() {
            Ok(max) => max,
            Err(e) => {
                debug!(err = %e, "failed to read max seq");
                return;
            }
        },
        // Cursor 0 replays from the beginning; on an empty store that is
        // simply an empty catch-up, not a future cursor.
        Some(cursor) => {
            if cursor > 0 {
                match labeler.store().count_from(cursor) {
                    Ok(0) => {
                        send_future_cursor(&mut socket).await;
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(err = %e, "cursor validation failed");
                        return;
                    }
                }
            }
            cursor
        }
    };

    // Catch-up: everything after the cursor, in order, then go live.
    match drain_from(&labeler, &mut socket, &mut last_sent).await {
        Ok(()) => {}
        Err(StreamEnd::Labeler(e)) => {
            debug!(err = %e, "catch-up failed");
            return;
        }
        Err(StreamEnd::Socket | StreamEnd::Deadline) => return,
    }

    if send_with_deadline(&mut socket, Message::Ping(Bytes::from_static(b"ping")))
        .await
        .is_err()
    {
        return;
    }

    let mut keepalive = interval_at(Instant::now() + KEEPALIVE_PERIOD, KEEPALIVE_PERIOD);
    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                if send_with_deadline(&mut socket, Message::Ping(Bytes::from_static(b"ping")))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            woken = sub.woken() => {
                if !woken {
                    return;
                }
                match drain_from(&labeler, &mut socket, &mut last_sent).await {
                    Ok(()) => {}
                    Err(StreamEnd::Labeler(e)) => {
                        debug!(err = %e, "live tail failed");
                        return;
                    }
                    Err(StreamEnd::Socket | StreamEnd::Deadline) => return,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                    // Control frames are answered by the transport; data
                    // frames from the peer carry nothing for us.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Send every entry with `seq > last_sent`, in batches, advancing
/// `last_sent` as frames go out. Entries appended while a batch is in
/// flight are picked up by the next iteration.
async fn drain_from(
    labeler: &Labeler,
    socket: &mut WebSocket,
    last_sent: &mut i64,
) -> Result<(), StreamEnd> {
    loop {
        let batch = labeler.store().scan_after(*last_sent, SCAN_BATCH)?;
        if batch.is_empty() {
            return Ok(());
        }
        for entry in batch {
            let sig = labeler.sign(&entry)?;
            let frame = tern_codec::labels_frame(entry.seq, &entry, &sig)?;
            send_with_deadline(socket, Message::Binary(frame.into())).await?;
            *last_sent = entry.seq;
        }
    }
}

async fn send_future_cursor(socket: &mut WebSocket) {
    let Ok(frame) = tern_codec::future_cursor_frame() else {
        return;
    };
    match timeout(WRITE_DEADLINE, socket.send(Message::Binary(frame.into()))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(err = %e, "failed to send FutureCursor frame"),
        Err(_) => debug!("FutureCursor write deadline exceeded"),
    }
}

async fn send_with_deadline(socket: &mut WebSocket, msg: Message) -> Result<(), StreamEnd> {
    match timeout(WRITE_DEADLINE, socket.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(err = %e, "subscription write failed");
            Err(StreamEnd::Socket)
        }
        Err(_) => {
            debug!("subscription write deadline exceeded");
            Err(StreamEnd::Deadline)
        }
    }
}
