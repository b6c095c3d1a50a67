use super::protocol::SYSTEM_AGENT;
use super::transport::{ChannelKind, StreamTransport};
use super::StreamError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use pin_project::pin_project;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tracing::debug;

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// Normalizes the frame to the JSON shape the socket channel delivers.
    ///
    /// The backend's own `connected` and `heartbeat` frames carry bare objects
    /// without an `agent`; those become system-channel messages named after
    /// the SSE event.
    pub fn into_wire_text(self) -> String {
        let name = self.event.unwrap_or_else(|| "message".to_string());
        match serde_json::from_str::<Value>(&self.data) {
            Ok(Value::Object(object)) if !object.contains_key("agent") => {
                let timestamp = object.get("timestamp").cloned().unwrap_or(Value::Null);
                json!({
                    "agent": SYSTEM_AGENT,
                    "event": name,
                    "content": "",
                    "timestamp": timestamp,
                    "metadata": object,
                })
                .to_string()
            }
            _ => self.data,
        }
    }
}

/// Longest unterminated line the decoder buffers before giving up on it.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental `text/event-stream` parser. Chunk boundaries may fall anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    /// Skipping the rest of an oversized line.
    discarding: bool,
    error: Option<StreamError>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<SseFrame> {
        if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    chunk = &chunk[pos + 1..];
                    self.discarding = false;
                }
                None => return Vec::new(),
            }
        }
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            // The partial event is unusable once one of its lines is dropped
            self.buffer = Vec::new();
            self.event = None;
            self.data.clear();
            self.discarding = true;
            self.error = Some(StreamError::Parse(format!(
                "event-stream line exceeds {} bytes",
                MAX_LINE_BYTES
            )));
        }
        frames
    }

    /// Failure recorded by the last `push`, if any.
    pub fn take_error(&mut self) -> Option<StreamError> {
        self.error.take()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id, retry and unknown fields are ignored
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseFrame {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Adapts a byte-chunk stream into a stream of SSE frames.
#[pin_project]
pub struct SseStream<S> {
    #[pin]
    inner: S,
    decoder: SseDecoder,
    ready: VecDeque<Result<SseFrame, StreamError>>,
}

impl<S> SseStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
        }
    }
}

impl<S, B, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<StreamError>,
{
    type Item = Result<SseFrame, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(item) = this.ready.pop_front() {
                return Poll::Ready(Some(item));
            }
            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => {
                    let frames = this.decoder.push(chunk.as_ref());
                    this.ready.extend(frames.into_iter().map(Ok));
                    if let Some(err) = this.decoder.take_error() {
                        this.ready.push_back(Err(err));
                    }
                }
                Some(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
                None => return Poll::Ready(None),
            }
        }
    }
}

pub struct EventStreamTransport {
    client: reqwest::Client,
    frames: Option<BoxStream<'static, Result<SseFrame, StreamError>>>,
}

impl EventStreamTransport {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client, frames: None }
    }
}

impl Default for EventStreamTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamTransport for EventStreamTransport {
    fn channel(&self) -> ChannelKind {
        ChannelKind::EventStream
    }

    fn is_open(&self) -> bool {
        self.frames.is_some()
    }

    async fn connect(&mut self, address: &str) -> Result<(), StreamError> {
        self.frames = None;

        debug!(address, "Opening event stream");
        let response = self
            .client
            .get(address)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| StreamError::Connection(format!("{}: {}", address, e)))?;

        self.frames = Some(SseStream::new(response.bytes_stream()).boxed());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), StreamError> {
        self.frames = None;
        Ok(())
    }

    async fn send_text(&mut self, _text: String) -> Result<(), StreamError> {
        Err(StreamError::Unsupported(ChannelKind::EventStream))
    }

    async fn next_frame(&mut self) -> Option<Result<String, StreamError>> {
        let frames = self.frames.as_mut()?;
        match frames.next().await {
            Some(Ok(frame)) => Some(Ok(frame.into_wire_text())),
            // An oversized line only loses that event
            Some(Err(StreamError::Parse(message))) => Some(Err(StreamError::Parse(message))),
            Some(Err(e)) => {
                self.frames = None;
                Some(Err(e))
            }
            None => {
                self.frames = None;
                None
            }
        }
    }
}
