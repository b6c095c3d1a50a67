use super::StreamError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::value::StrDeserializer;
use serde::de::IntoDeserializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Origin marker the backend uses for connection-lifecycle and pipeline-level messages.
pub const SYSTEM_AGENT: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Thought,
    Action,
    Observation,
    Plan,
    Scene,
    MemoryUpdate,
    RagResult,
    Error,
    Complete,
    Status,
}

impl EventKind {
    pub fn parse(tag: &str) -> Option<Self> {
        let deserializer: StrDeserializer<'_, serde::de::value::Error> = tag.into_deserializer();
        Self::deserialize(deserializer).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Thought => "thought",
            EventKind::Action => "action",
            EventKind::Observation => "observation",
            EventKind::Plan => "plan",
            EventKind::Scene => "scene",
            EventKind::MemoryUpdate => "memory_update",
            EventKind::RagResult => "rag_result",
            EventKind::Error => "error",
            EventKind::Complete => "complete",
            EventKind::Status => "status",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection-lifecycle messages on the system channel. Never enter the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemSignal {
    Connected,
    Heartbeat,
    Pong,
    Error(String),
}

/// Inbound message as the backend serializes it.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub agent: String,
    pub event: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// A classified stage event that has not been sequenced yet.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingEvent {
    pub agent: String,
    pub kind: EventKind,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Signal(SystemSignal),
    Event(IncomingEvent),
}

impl WireMessage {
    pub fn classify(self) -> Result<Inbound, StreamError> {
        let content = self.content.unwrap_or_default();

        if self.agent == SYSTEM_AGENT {
            match self.event.as_str() {
                "connected" => return Ok(Inbound::Signal(SystemSignal::Connected)),
                "heartbeat" => return Ok(Inbound::Signal(SystemSignal::Heartbeat)),
                "pong" => return Ok(Inbound::Signal(SystemSignal::Pong)),
                "error" => return Ok(Inbound::Signal(SystemSignal::Error(content))),
                _ => {}
            }
        }

        let kind = EventKind::parse(&self.event)
            .ok_or_else(|| StreamError::Parse(format!("unknown event kind '{}'", self.event)))?;

        Ok(Inbound::Event(IncomingEvent {
            agent: self.agent,
            kind,
            content,
            timestamp: self.timestamp.as_deref().and_then(parse_timestamp),
            metadata: self.metadata.unwrap_or_default(),
        }))
    }
}

pub fn parse_inbound(raw: &str) -> Result<Inbound, StreamError> {
    let message: WireMessage = serde_json::from_str(raw)?;
    message.classify()
}

/// Accepts RFC 3339 and the naive UTC form Python's `isoformat()` produces.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// An event accepted into a session's log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub seq: u64,
    pub agent: String,
    pub kind: EventKind,
    pub content: String,
    pub metadata: Map<String, Value>,
    /// Origin timestamp, or receipt time when the backend sent none. Display only.
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub connection_id: Uuid,
}

impl Event {
    pub fn from_incoming(seq: u64, incoming: IncomingEvent, connection_id: Uuid) -> Self {
        let received_at = Utc::now();
        Self {
            seq,
            agent: incoming.agent,
            kind: incoming.kind,
            content: incoming.content,
            metadata: incoming.metadata,
            timestamp: incoming.timestamp.unwrap_or(received_at),
            received_at,
            connection_id,
        }
    }

    pub fn is_system(&self) -> bool {
        self.agent == SYSTEM_AGENT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Start,
    Ping,
}

/// Control message for the socket channel: `{command, ...extra}`.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub command: Command,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OutboundMessage {
    pub fn new(command: Command, mut extra: Map<String, Value>) -> Self {
        extra.remove("command");
        Self { command, extra }
    }

    pub fn to_json(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }
}
