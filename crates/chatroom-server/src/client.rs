use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use chatroom_core::{InboundMessage, Username};

use crate::config::ClientConfig;
use crate::hub::HubPort;
use crate::transport::{Frame, FrameSink, FrameStream, Transport};

/// Serialized message shared between every queue it is fanned out to.
pub type Payload = Arc<str>;

/// Unique connection identifier. Two connections claiming the same
/// username still have different ids.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl Default for ConnectionId {
    fn default() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a pump loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpExit {
    /// The remote ended the stream.
    Eof,
    /// A Close frame arrived, or the outbound queue was closed.
    Closed,
    /// No inbound frame within `pong_wait`.
    IdleTimeout,
    /// Inbound payload larger than `max_message_size`.
    Oversized,
    /// Read or write error from the connection.
    Transport,
    /// A write did not finish within `write_wait`.
    WriteTimeout,
    /// `close()` was called.
    Cancelled,
}

struct Pumps {
    transport: Transport,
    rx: mpsc::Receiver<Payload>,
}

/// One connected participant.
///
/// Owns the connection and a bounded outbound queue. The hub only ever
/// calls [`Client::enqueue`], which never blocks; the outbound pump drains
/// the queue onto the connection.
pub struct Client {
    id: ConnectionId,
    username: Username,
    tx: mpsc::Sender<Payload>,
    dropped: AtomicU64,
    cancel: CancellationToken,
    hub: Arc<dyn HubPort>,
    config: ClientConfig,
    pumps: Mutex<Option<Pumps>>,
}

impl Client {
    pub fn new(
        username: Username,
        transport: Transport,
        hub: Arc<dyn HubPort>,
        config: &ClientConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.send_queue_capacity.max(1));
        Arc::new(Self {
            id: ConnectionId::new(),
            username,
            tx,
            dropped: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            hub,
            config: config.clone(),
            pumps: Mutex::new(Some(Pumps { transport, rx })),
        })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    /// Queue a payload without waiting. Returns false if it was dropped
    /// because the queue is full or the client is closed.
    pub fn enqueue(&self, payload: Payload) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.tx.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    conn_id = %self.id,
                    username = %self.username,
                    msg_len = msg.len(),
                    dropped,
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Payloads dropped so far because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Shut the connection down. Idempotent.
    ///
    /// Running pumps flush what is queued and send a Close frame. If the
    /// pumps were never started, a one-shot task does the same flush.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        debug!(conn_id = %self.id, username = %self.username, "client closing");

        if let Some(Pumps { transport, rx }) = self.pumps.lock().take() {
            let (sink, _stream) = transport.into_parts();
            let id = self.id.clone();
            let write_wait = self.config.write_wait;
            tokio::spawn(async move {
                let exit = flush_and_close(sink, rx, write_wait).await;
                debug!(conn_id = %id, reason = ?exit, "unstarted client flushed");
            });
        }
    }

    /// Spawn the inbound and outbound pumps. Only the first call after a
    /// successful registration does anything.
    pub fn start(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            debug!(conn_id = %self.id, "start after close ignored");
            return;
        }
        let Some(Pumps { transport, rx }) = self.pumps.lock().take() else {
            debug!(conn_id = %self.id, "pumps already started");
            return;
        };
        let (sink, stream) = transport.into_parts();

        tokio::spawn(Arc::clone(self).write_pump(sink, rx));
        tokio::spawn(Arc::clone(self).read_pump(stream));
    }

    async fn read_pump(self: Arc<Self>, mut stream: FrameStream) {
        let exit = loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break PumpExit::Cancelled,
                next = timeout(self.config.pong_wait, stream.next()) => next,
            };

            let frame = match next {
                Err(_) => break PumpExit::IdleTimeout,
                Ok(None) => break PumpExit::Eof,
                Ok(Some(Err(e))) => {
                    debug!(conn_id = %self.id, error = %e, "read failed");
                    break PumpExit::Transport;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let raw = match frame {
                Frame::Text(text) => text.into_bytes(),
                Frame::Binary(data) => data,
                Frame::Close => break PumpExit::Closed,
                Frame::Ping | Frame::Pong => {
                    trace!(conn_id = %self.id, "keepalive");
                    continue;
                }
            };

            if raw.len() > self.config.max_message_size {
                warn!(
                    conn_id = %self.id,
                    size = raw.len(),
                    limit = self.config.max_message_size,
                    "inbound message too large"
                );
                break PumpExit::Oversized;
            }

            let inbound = match InboundMessage::decode(&raw) {
                Ok(inbound) => inbound,
                Err(e) => {
                    warn!(conn_id = %self.id, username = %self.username, error = %e, "dropping malformed message");
                    continue;
                }
            };

            match inbound.into_chat(&self.username).to_json() {
                Ok(json) => self.hub.broadcast(Payload::from(json)).await,
                Err(e) => warn!(conn_id = %self.id, error = %e, "failed to encode chat message"),
            }
        };

        info!(conn_id = %self.id, username = %self.username, reason = ?exit, "inbound loop ended");
        self.hub.unregister(Arc::clone(&self)).await;
        self.close();
    }

    async fn write_pump(self: Arc<Self>, mut sink: FrameSink, mut rx: mpsc::Receiver<Payload>) {
        let period = self.config.ping_period;
        let mut ticker = interval_at(Instant::now() + period, period);

        let exit = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break PumpExit::Cancelled,
                payload = rx.recv() => {
                    let Some(first) = payload else { break PumpExit::Closed };
                    let frame = coalesce(first, &mut rx);
                    if let Err(exit) = write_frame(&mut sink, frame, self.config.write_wait).await {
                        break exit;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(exit) = write_frame(&mut sink, Frame::Ping, self.config.write_wait).await {
                        break exit;
                    }
                    trace!(conn_id = %self.id, "sent ping");
                }
            }
        };

        let exit = match exit {
            PumpExit::Cancelled | PumpExit::Closed => {
                match flush_and_close(sink, rx, self.config.write_wait).await {
                    Ok(()) => exit,
                    Err(flush_exit) => flush_exit,
                }
            }
            _ => exit,
        };

        debug!(conn_id = %self.id, reason = ?exit, "outbound loop ended");
        self.close();
    }
}

/// Join everything queued right now behind `first` into one text frame.
fn coalesce(first: Payload, rx: &mut mpsc::Receiver<Payload>) -> Frame {
    let mut text = String::from(&*first);
    for _ in 0..rx.len() {
        match rx.try_recv() {
            Ok(next) => {
                text.push('\n');
                text.push_str(&next);
            }
            Err(_) => break,
        }
    }
    Frame::Text(text)
}

async fn write_frame(sink: &mut FrameSink, frame: Frame, write_wait: Duration) -> Result<(), PumpExit> {
    match timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "write failed");
            Err(PumpExit::Transport)
        }
        Err(_) => Err(PumpExit::WriteTimeout),
    }
}

/// Write whatever is still queued, then a Close frame, then close the sink.
async fn flush_and_close(
    mut sink: FrameSink,
    mut rx: mpsc::Receiver<Payload>,
    write_wait: Duration,
) -> Result<(), PumpExit> {
    rx.close();
    if let Ok(first) = rx.try_recv() {
        write_frame(&mut sink, coalesce(first, &mut rx), write_wait).await?;
    }
    write_frame(&mut sink, Frame::Close, write_wait).await?;
    match timeout(write_wait, sink.close()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(PumpExit::Transport),
        Err(_) => Err(PumpExit::WriteTimeout),
    }
}
