// src/socket/mod.rs
// One duplex WebSocket, split into an independent reader and writer task
// (§4.2). Grounded on the teacher's split-socket handling in
// `api/ws/chat/mod.rs`/`connection.rs`, restructured so the writer owns the
// sink directly instead of sharing it behind an `Arc<Mutex<_>>` — the bounded
// mailbox already serializes writes, so no lock is needed.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::socket::SocketConfig;
use crate::error::HubError;

/// One inbound frame handed from the reader task to the owner (Router/Hub).
/// Carries the parsed JSON body; direction-specific tag dispatch happens
/// above this layer.
pub type InboundFrame = Value;

/// The only handle through which a socket may be written. Cheaply cloneable;
/// every clone shares the same bounded mailbox and therefore the writer's
/// in-order delivery guarantee.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Message>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl WriterHandle {
    /// Enqueues a frame for delivery. Non-blocking: a full mailbox is
    /// `Backpressure`, a torn-down writer is `Closed`.
    pub fn send(&self, frame: &impl Serialize) -> Result<(), HubError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HubError::Closed);
        }
        let json = serde_json::to_string(frame)
            .map_err(|e| HubError::ProtocolError(format!("encode: {e}")))?;
        self.tx
            .try_send(Message::Text(Utf8Bytes::from(json)))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    HubError::Backpressure("writer mailbox full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => HubError::Closed,
            })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.tx.try_send(Message::Close(None));
    }

    /// Closes with an explicit WS close code/reason (§6 close codes).
    pub fn close_with(&self, code: u16, reason: &str) {
        self.closed.store(true, Ordering::Release);
        let frame = axum::extract::ws::CloseFrame {
            code,
            reason: Utf8Bytes::from(reason.to_string()),
        };
        let _ = self.tx.try_send(Message::Close(Some(frame)));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Outcome of the reader loop, reported to the owner once the socket ends.
pub enum SocketExit {
    /// Peer sent a close frame, or the stream ended cleanly.
    Closed,
    /// A frame violated the wire contract (oversized, non-UTF8-JSON).
    Protocol(String),
    /// No pong within the keepalive deadline.
    Timeout,
}

/// Spawns the reader, writer, and keepalive tasks for one WebSocket.
/// `inbound_tx` receives one [`InboundFrame`] per well-formed message; the
/// channel closing early (owner gone) tears the socket down.
pub fn spawn(
    socket: WebSocket,
    config: &SocketConfig,
    inbound_tx: mpsc::Sender<InboundFrame>,
) -> (WriterHandle, tokio::sync::oneshot::Receiver<SocketExit>) {
    let (sink, mut stream) = socket.split();
    let (writer_tx, mut writer_rx) = mpsc::channel::<Message>(config.writer_buffer_frames);
    let (exit_tx, exit_rx) = tokio::sync::oneshot::channel();

    let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let handle = WriterHandle {
        tx: writer_tx.clone(),
        closed: closed.clone(),
    };

    let last_activity = Arc::new(AtomicI64::new(now_ms()));
    let max_frame_bytes = config.max_frame_bytes;
    let ping_interval = Duration::from_secs(config.ping_interval_secs);
    let pong_timeout_ms = (config.pong_timeout_secs * 1000) as i64;

    // Reader: one JSON object per text message, handed to the caller.
    let reader_closed = closed.clone();
    let reader_activity = last_activity.clone();
    let reader_writer_tx = writer_tx.clone();
    let reader_task = async move {
        loop {
            let Some(msg) = stream.next().await else {
                return SocketExit::Closed;
            };
            let msg = match msg {
                Ok(m) => m,
                Err(e) => return SocketExit::Protocol(format!("transport error: {e}")),
            };

            reader_activity.store(now_ms(), Ordering::Release);

            match msg {
                Message::Text(text) => {
                    if text.len() > max_frame_bytes {
                        return SocketExit::Protocol(format!(
                            "frame of {} bytes exceeds {} byte limit",
                            text.len(),
                            max_frame_bytes
                        ));
                    }
                    let value: Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => return SocketExit::Protocol(format!("malformed JSON: {e}")),
                    };
                    if inbound_tx.send(value).await.is_err() {
                        return SocketExit::Closed;
                    }
                }
                Message::Binary(_) => {
                    return SocketExit::Protocol("binary frames are not part of the wire protocol".to_string());
                }
                Message::Ping(data) => {
                    if reader_writer_tx.try_send(Message::Pong(data)).is_err() {
                        debug!("dropped pong reply, writer mailbox full or closed");
                    }
                }
                Message::Pong(_) => {}
                Message::Close(_) => return SocketExit::Closed,
            }

            if reader_closed.load(Ordering::Acquire) {
                return SocketExit::Closed;
            }
        }
    };

    // Keepalive: pings on an interval; declares a timeout if nothing has been
    // heard (text, ping, or pong) from the peer within `pong_timeout_secs`.
    let keepalive_activity = last_activity.clone();
    let keepalive_writer_tx = writer_tx.clone();
    let keepalive_closed = closed.clone();
    let keepalive_task = async move {
        let mut ticker = time::interval(ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if keepalive_closed.load(Ordering::Acquire) {
                return None;
            }
            let silence_ms = now_ms() - keepalive_activity.load(Ordering::Acquire);
            if silence_ms > pong_timeout_ms {
                return Some(SocketExit::Timeout);
            }
            if keepalive_writer_tx.try_send(Message::Ping(Vec::new().into())).is_err() {
                return Some(SocketExit::Closed);
            }
        }
    };

    // Writer: the only task touching the sink; drains the mailbox in order.
    let writer_closed = closed.clone();
    let writer_task = async move {
        let mut sink = sink;
        while let Some(msg) = writer_rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                break;
            }
            if is_close {
                break;
            }
        }
        writer_closed.store(true, Ordering::Release);
        let _ = sink.close().await;
    };

    tokio::spawn(writer_task);
    tokio::spawn(async move {
        tokio::select! {
            exit = reader_task => {
                closed.store(true, Ordering::Release);
                let _ = exit_tx.send(exit);
            }
            Some(exit) = keepalive_task => {
                closed.store(true, Ordering::Release);
                let _ = exit_tx.send(exit);
            }
        }
    });

    (handle, exit_rx)
}

fn now_ms() -> i64 {
    // `chrono::Utc::now()` rather than `Instant` so the value is comparable
    // across the atomic without a monotonic-clock epoch dance.
    chrono::Utc::now().timestamp_millis()
}
