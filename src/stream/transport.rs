use super::event_stream::EventStreamTransport;
use super::websocket::WebSocketTransport;
use super::StreamError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Bidirectional socket: `/ws/{session_id}`
    #[default]
    #[serde(rename = "websocket")]
    WebSocket,
    /// One-way server-sent events: `/events/{session_id}`
    #[serde(rename = "event_stream")]
    EventStream,
}

impl ChannelKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            ChannelKind::WebSocket => "ws",
            ChannelKind::EventStream => "events",
        }
    }

    pub fn accepts_commands(&self) -> bool {
        matches!(self, ChannelKind::WebSocket)
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::WebSocket => f.write_str("websocket"),
            ChannelKind::EventStream => f.write_str("event-stream"),
        }
    }
}

/// A single-owner connection to the backend.
///
/// `connect` must release any previous connection before opening a new one so
/// frames from a stale handle can never be delivered. `next_frame` must be
/// cancel-safe: the session polls it inside `tokio::select!`.
#[async_trait]
pub trait StreamTransport: Send {
    fn channel(&self) -> ChannelKind;
    fn is_open(&self) -> bool;
    async fn connect(&mut self, address: &str) -> Result<(), StreamError>;
    async fn disconnect(&mut self) -> Result<(), StreamError>;
    async fn send_text(&mut self, text: String) -> Result<(), StreamError>;
    /// Next inbound JSON payload; `None` once the connection is closed.
    async fn next_frame(&mut self) -> Option<Result<String, StreamError>>;
}

pub enum Transport {
    WebSocket(WebSocketTransport),
    EventStream(EventStreamTransport),
}

impl Transport {
    pub fn for_channel(channel: ChannelKind) -> Self {
        match channel {
            ChannelKind::WebSocket => Transport::WebSocket(WebSocketTransport::new()),
            ChannelKind::EventStream => Transport::EventStream(EventStreamTransport::new()),
        }
    }
}

#[async_trait]
impl StreamTransport for Transport {
    fn channel(&self) -> ChannelKind {
        match self {
            Transport::WebSocket(transport) => transport.channel(),
            Transport::EventStream(transport) => transport.channel(),
        }
    }

    fn is_open(&self) -> bool {
        match self {
            Transport::WebSocket(transport) => transport.is_open(),
            Transport::EventStream(transport) => transport.is_open(),
        }
    }

    async fn connect(&mut self, address: &str) -> Result<(), StreamError> {
        match self {
            Transport::WebSocket(transport) => transport.connect(address).await,
            Transport::EventStream(transport) => transport.connect(address).await,
        }
    }

    async fn disconnect(&mut self) -> Result<(), StreamError> {
        match self {
            Transport::WebSocket(transport) => transport.disconnect().await,
            Transport::EventStream(transport) => transport.disconnect().await,
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        match self {
            Transport::WebSocket(transport) => transport.send_text(text).await,
            Transport::EventStream(transport) => transport.send_text(text).await,
        }
    }

    async fn next_frame(&mut self) -> Option<Result<String, StreamError>> {
        match self {
            Transport::WebSocket(transport) => transport.next_frame().await,
            Transport::EventStream(transport) => transport.next_frame().await,
        }
    }
}
