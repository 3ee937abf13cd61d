//! WebSocket Client
//!
//! One client owns one upgraded connection. Starting it registers an
//! outbound queue with the hub and launches two tasks:
//!
//! - the read loop, which decodes inbound frames and hands them to the hub;
//! - the write loop, which drains the outbound queue to the socket and
//!   sends keep-alive pings.
//!
//! Both loops share a cancellation token. Whichever exits first cancels the
//! other; the read loop is the only place that sends `unregister`, so it is
//! sent exactly once per connection.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::codec;
use super::hub::{HubError, HubHandle, Inbound};
use crate::config::WebSocketSettings;
use crate::infrastructure::metrics;

/// Upper bound on ids remembered while history replay may overlap live
/// traffic, for replays whose completion marker never arrives.
const REPLAY_DEDUP_LIMIT: usize = 4096;

/// Identifies one connection. A user may hold several at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Item on a client's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// An encoded message frame
    Message { id: i64, frame: Utf8Bytes },
    /// History replay has finished enqueueing
    ReplayComplete,
}

/// The hub's record of a registered client.
///
/// Dropping the handle drops the only strong sender of the outbound queue,
/// which closes it and makes the write loop send a close frame.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    pub user_id: String,
    pub chat_id: i64,
    pub outbound: mpsc::Sender<Outbound>,
}

/// What the bootstrap keeps after a client has started.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub id: ClientId,
    pub user_id: String,
    pub chat_id: i64,
    outbound: mpsc::WeakSender<Outbound>,
}

impl ClientSession {
    pub fn new(
        id: ClientId,
        user_id: String,
        chat_id: i64,
        outbound: mpsc::WeakSender<Outbound>,
    ) -> Self {
        Self {
            id,
            user_id,
            chat_id,
            outbound,
        }
    }

    /// Weak handle on the outbound queue; upgrading fails once the hub has
    /// released the client.
    pub fn outbound(&self) -> &mpsc::WeakSender<Outbound> {
        &self.outbound
    }
}

/// Remembers ids written while history replay may still overlap live
/// traffic, so a message queued both live and from history is written once.
#[derive(Debug)]
struct ReplayFilter {
    seen: Option<HashSet<i64>>,
}

impl ReplayFilter {
    fn new() -> Self {
        Self {
            seen: Some(HashSet::new()),
        }
    }

    /// Whether a frame with this id should be written.
    fn admit(&mut self, id: i64) -> bool {
        let Some(seen) = self.seen.as_mut() else {
            return true;
        };
        if !seen.insert(id) {
            return false;
        }
        if seen.len() >= REPLAY_DEDUP_LIMIT {
            self.seen = None;
        }
        true
    }

    /// Replay is over; stop tracking.
    fn finish(&mut self) {
        self.seen = None;
    }

    #[cfg(test)]
    fn is_tracking(&self) -> bool {
        self.seen.is_some()
    }
}

/// Per-connection timers
#[derive(Debug, Clone, Copy)]
struct Timers {
    write_wait: Duration,
    pong_wait: Duration,
    ping_period: Duration,
}

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("write timed out")]
    Timeout,

    #[error("socket error: {0}")]
    Socket(#[from] axum::Error),
}

/// A connection that has been accepted but not yet started.
pub struct Client {
    hub: HubHandle,
    socket: WebSocket,
    user_id: String,
    chat_id: i64,
    queue_capacity: usize,
    timers: Timers,
}

impl Client {
    pub fn new(
        hub: HubHandle,
        socket: WebSocket,
        user_id: String,
        chat_id: i64,
        settings: &WebSocketSettings,
    ) -> Self {
        Self {
            hub,
            socket,
            user_id,
            chat_id,
            queue_capacity: settings.outbound_queue_capacity,
            timers: Timers {
                write_wait: settings.write_wait(),
                pong_wait: settings.pong_wait(),
                ping_period: settings.ping_period(),
            },
        }
    }

    /// Register with the hub and launch both loops.
    ///
    /// Only waits for the registration handoff. On error the socket is
    /// dropped, which closes the connection.
    pub async fn start(self) -> Result<ClientSession, HubError> {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let session = ClientSession::new(id, self.user_id.clone(), self.chat_id, tx.downgrade());

        self.hub
            .register(ClientHandle {
                id,
                user_id: self.user_id,
                chat_id: self.chat_id,
                outbound: tx,
            })
            .await?;

        let (sink, stream) = self.socket.split();
        let cancel = CancellationToken::new();

        tokio::spawn(write_loop(sink, rx, cancel.clone(), id, self.timers));
        tokio::spawn(read_loop(stream, self.hub, cancel, id, self.timers));

        Ok(session)
    }
}

/// Drain the outbound queue to the socket and keep the peer alive.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
    client_id: ClientId,
    timers: Timers,
) {
    let mut ping = interval_at(Instant::now() + timers.ping_period, timers.ping_period);
    let mut replay = ReplayFilter::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            item = rx.recv() => match item {
                Some(Outbound::Message { id, frame }) => {
                    if !replay.admit(id) {
                        tracing::trace!(client_id = %client_id, message_id = id, "Skipping duplicate frame");
                        continue;
                    }
                    if let Err(e) = send_frame(&mut sink, Message::Text(frame), timers.write_wait).await {
                        tracing::debug!(client_id = %client_id, error = %e, "Write failed");
                        break;
                    }
                }
                Some(Outbound::ReplayComplete) => replay.finish(),
                None => {
                    // The hub released this client.
                    let _ = send_frame(&mut sink, Message::Close(None), timers.write_wait).await;
                    break;
                }
            },

            _ = ping.tick() => {
                if let Err(e) = send_frame(&mut sink, Message::Ping(Bytes::new()), timers.write_wait).await {
                    tracing::debug!(client_id = %client_id, error = %e, "Ping failed");
                    break;
                }
            }
        }
    }

    cancel.cancel();
    let _ = timeout(timers.write_wait, sink.close()).await;
    tracing::debug!(client_id = %client_id, "Write loop finished");
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), WriteError> {
    timeout(write_wait, sink.send(message))
        .await
        .map_err(|_| WriteError::Timeout)??;
    Ok(())
}

/// Pull frames off the socket until it fails, goes quiet, or is cancelled.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    hub: HubHandle,
    cancel: CancellationToken,
    client_id: ClientId,
    timers: Timers,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = timeout(timers.pong_wait, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                tracing::info!(client_id = %client_id, "Read deadline exceeded, closing connection");
                break;
            }
            Ok(None) => {
                tracing::debug!(client_id = %client_id, "Connection closed");
                break;
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(client_id = %client_id, error = %e, "WebSocket read error");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let decoded = match frame {
            Message::Text(text) => codec::decode_inbound(text.as_str().as_bytes()),
            Message::Binary(data) => codec::decode_inbound(&data[..]),
            // Any frame counts as activity; the deadline restarts on the next iteration.
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                tracing::debug!(client_id = %client_id, "Close frame received");
                break;
            }
        };

        match decoded {
            Ok(inbound) => {
                let forwarded = hub
                    .broadcast(Inbound {
                        client_id,
                        content: inbound.content,
                    })
                    .await;
                if forwarded.is_err() {
                    tracing::warn!(client_id = %client_id, "Hub stopped, closing connection");
                    break;
                }
            }
            Err(e) => {
                metrics::DECODE_FAILURES_TOTAL.inc();
                tracing::debug!(client_id = %client_id, error = %e, "Dropping malformed frame");
            }
        }
    }

    cancel.cancel();
    let _ = hub.unregister(client_id).await;
    tracing::debug!(client_id = %client_id, "Read loop finished");
}
