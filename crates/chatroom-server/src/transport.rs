//! Framing between a client actor and its live connection.
//!
//! The actor only sees [`Frame`]s through a boxed sink and stream, so the same
//! pump code drives an upgraded axum WebSocket in production and an
//! in-process channel pair in tests.

use std::collections::VecDeque;
use std::pin::Pin;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::channel::mpsc;
use futures::future;
use futures::{Sink, SinkExt, Stream, StreamExt};

use chatroom_core::Message;

/// One unit on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// Write and read halves of one connection.
pub struct Transport {
    sink: FrameSink,
    stream: FrameStream,
}

impl Transport {
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<Frame, Error = TransportError> + Send + 'static,
        R: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Adapt an upgraded axum WebSocket.
    pub fn from_websocket(socket: WebSocket) -> Self {
        let (ws_tx, ws_rx) = socket.split();

        let sink = ws_tx
            .sink_map_err(|e| TransportError::Protocol(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(to_ws(frame))));

        let stream = ws_rx.map(|item| {
            item.map(from_ws)
                .map_err(|e| TransportError::Protocol(e.to_string()))
        });

        Self::new(sink, stream)
    }

    /// In-process duplex. The returned peer plays the remote end.
    pub fn memory() -> (Self, MemoryPeer) {
        let (out_tx, out_rx) = mpsc::unbounded::<Frame>();
        let (in_tx, in_rx) = mpsc::unbounded::<Result<Frame, TransportError>>();

        let sink = out_tx.sink_map_err(|_| TransportError::Closed);
        let transport = Self::new(sink, in_rx);

        let peer = MemoryPeer {
            to_client: in_tx,
            from_client: out_rx,
            pending: VecDeque::new(),
        };
        (transport, peer)
    }

    pub fn into_parts(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

fn to_ws(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text.into()),
        Frame::Binary(data) => WsMessage::Binary(data.into()),
        Frame::Ping => WsMessage::Ping(Vec::new().into()),
        Frame::Pong => WsMessage::Pong(Vec::new().into()),
        Frame::Close => WsMessage::Close(None),
    }
}

fn from_ws(msg: WsMessage) -> Frame {
    match msg {
        WsMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
        WsMessage::Binary(data) => Frame::Binary(data.to_vec()),
        WsMessage::Ping(_) => Frame::Ping,
        WsMessage::Pong(_) => Frame::Pong,
        WsMessage::Close(_) => Frame::Close,
    }
}

/// Remote end of a [`Transport::memory`] pair.
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
    pending: VecDeque<String>,
}

impl MemoryPeer {
    /// Deliver a frame to the client's inbound loop. False once the client
    /// has dropped its read half.
    pub fn send(&self, frame: Frame) -> bool {
        self.to_client.unbounded_send(Ok(frame)).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    /// Make the client's next read fail.
    pub fn send_error(&self, error: TransportError) -> bool {
        self.to_client.unbounded_send(Err(error)).is_ok()
    }

    /// End the inbound stream as if the remote had gone away.
    pub fn hang_up(&self) {
        self.to_client.close_channel();
    }

    /// Next raw frame the client wrote. `None` once the client's sink is gone.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.from_client.next().await
    }

    /// Next payload the client wrote, with coalesced text frames split on
    /// `\n` and keepalive pings skipped. `None` on Close or when the sink is
    /// gone.
    pub async fn next_payload(&mut self) -> Option<String> {
        loop {
            if let Some(payload) = self.pending.pop_front() {
                return Some(payload);
            }
            match self.next_frame().await? {
                Frame::Text(text) => self.pending.extend(text.split('\n').map(str::to_owned)),
                Frame::Close => return None,
                Frame::Ping | Frame::Pong | Frame::Binary(_) => {}
            }
        }
    }

    /// Next payload decoded as a [`Message`]. Undecodable payloads are skipped.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            let payload = self.next_payload().await?;
            if let Ok(message) = Message::from_json(&payload) {
                return Some(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pair_carries_frames_both_ways() {
        let (transport, mut peer) = Transport::memory();
        let (mut sink, mut stream) = transport.into_parts();

        assert!(peer.send_text("hello"));
        assert_eq!(stream.next().await.unwrap().unwrap(), Frame::Text("hello".into()));

        sink.send(Frame::Ping).await.unwrap();
        assert_eq!(peer.next_frame().await, Some(Frame::Ping));
    }

    #[tokio::test]
    async fn next_payload_splits_coalesced_text() {
        let (transport, mut peer) = Transport::memory();
        let (mut sink, _stream) = transport.into_parts();

        sink.send(Frame::Ping).await.unwrap();
        sink.send(Frame::Text("a\nb".into())).await.unwrap();
        sink.send(Frame::Text("c".into())).await.unwrap();
        sink.send(Frame::Close).await.unwrap();

        assert_eq!(peer.next_payload().await.as_deref(), Some("a"));
        assert_eq!(peer.next_payload().await.as_deref(), Some("b"));
        assert_eq!(peer.next_payload().await.as_deref(), Some("c"));
        assert_eq!(peer.next_payload().await, None);
    }

    #[tokio::test]
    async fn hang_up_ends_stream() {
        let (transport, peer) = Transport::memory();
        let (_sink, mut stream) = transport.into_parts();
        peer.hang_up();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_peer_fails_writes() {
        let (transport, peer) = Transport::memory();
        let (mut sink, _stream) = transport.into_parts();
        drop(peer);
        assert!(matches!(
            sink.send(Frame::Text("x".into())).await,
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn websocket_frame_mapping() {
        assert_eq!(from_ws(to_ws(Frame::Text("hi".into()))), Frame::Text("hi".into()));
        assert_eq!(from_ws(to_ws(Frame::Binary(vec![1, 2]))), Frame::Binary(vec![1, 2]));
        assert_eq!(from_ws(to_ws(Frame::Ping)), Frame::Ping);
        assert_eq!(from_ws(to_ws(Frame::Close)), Frame::Close);
    }
}
