//! Transport-neutral frames and the axum WebSocket adapter.
//!
//! Session loops only see a `Stream` of inbound [`Frame`]s and a `Sink` of
//! outbound ones, so anything that can carry discrete messages (a WebSocket,
//! an in-process channel pair in tests) can back a session.

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{Sink, SinkExt, Stream, StreamExt, future},
};

/// One transport-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) | Self::Ping(data) | Self::Pong(data) => data.len(),
            Self::Close => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Self::Text(text.as_str().to_owned()),
            Message::Binary(data) => Self::Binary(data.to_vec()),
            Message::Ping(data) => Self::Ping(data.to_vec()),
            Message::Pong(data) => Self::Pong(data.to_vec()),
            Message::Close(_) => Self::Close,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Self::Text(text.into()),
            Frame::Binary(data) => Self::Binary(data.into()),
            Frame::Ping(data) => Self::Ping(data.into()),
            Frame::Pong(data) => Self::Pong(data.into()),
            Frame::Close => Self::Close(None),
        }
    }
}

/// Split an upgraded socket into independent (writer, reader) halves.
pub fn split(
    socket: WebSocket,
) -> (
    impl Sink<Frame, Error = axum::Error> + Send + Unpin + 'static,
    impl Stream<Item = Result<Frame, axum::Error>> + Send + Unpin + 'static,
) {
    let (sink, stream) = socket.split();
    let writer = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(Message::from(frame))));
    let reader = stream.map(|msg| msg.map(Frame::from));
    (writer, reader)
}
