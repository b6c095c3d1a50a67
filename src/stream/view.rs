use super::protocol::{Event, EventKind, IncomingEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Running,
    Complete,
    Error,
}

impl SessionStatus {
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Idle => 0,
            SessionStatus::Connecting => 1,
            SessionStatus::Running => 2,
            SessionStatus::Complete | SessionStatus::Error => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Complete | SessionStatus::Error)
    }

    /// Forward-only within a run; terminal states accept nothing.
    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Running => "running",
            SessionStatus::Complete => "complete",
            SessionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub seq: u64,
    pub payload: Value,
    pub mermaid_diagram: Option<String>,
    pub detected_domain: Option<String>,
}

impl Plan {
    fn from_event(event: &Event) -> Option<Self> {
        let payload = ["master_plan", "reasoning_plan"]
            .iter()
            .filter_map(|key| event.metadata.get(*key))
            .find(|value| !value.is_null())?;

        Some(Self {
            seq: event.seq,
            payload: payload.clone(),
            mermaid_diagram: string_field(&event.metadata, "mermaid_diagram"),
            detected_domain: string_field(&event.metadata, "detected_domain"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scene {
    pub seq: u64,
    pub agent: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalOutput {
    pub seq: u64,
    pub text: String,
    pub quality_score: Option<f64>,
    pub detected_domain: Option<String>,
}

impl FinalOutput {
    fn from_event(event: &Event) -> Option<Self> {
        let text = event.metadata.get("final_output")?.as_str()?;
        Some(Self {
            seq: event.seq,
            text: text.to_string(),
            quality_score: event.metadata.get("quality_score").and_then(Value::as_f64),
            detected_domain: string_field(&event.metadata, "detected_domain"),
        })
    }
}

fn string_field(metadata: &Map<String, Value>, key: &str) -> Option<String> {
    metadata.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Result of folding one incoming event.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Appended {
        event: Event,
        status_change: Option<SessionStatus>,
    },
    /// The run already reached a terminal status; nothing changed.
    Rejected,
}

/// Reconciled projection of one run's event stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DerivedView {
    session_id: Option<String>,
    status: SessionStatus,
    events: Vec<Event>,
    plan: Option<Plan>,
    scenes: Vec<Scene>,
    final_outputs: Vec<FinalOutput>,
    active_stage: Option<String>,
    last_seq: u64,
}

impl DerivedView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_run(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    /// Session id of the run this view belongs to.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    /// The first captured final output.
    pub fn final_output(&self) -> Option<&FinalOutput> {
        self.final_outputs.first()
    }

    /// All distinct final outputs in capture order.
    pub fn final_outputs(&self) -> &[FinalOutput] {
        &self.final_outputs
    }

    pub fn active_stage(&self) -> Option<&str> {
        self.active_stage.as_deref()
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Moves the status forward. Returns false when the move would go backward
    /// or the run is already terminal.
    pub fn advance_status(&mut self, next: SessionStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Drops back to idle unless the run already ended.
    pub fn settle_idle(&mut self) -> bool {
        if self.status.is_terminal() || self.status == SessionStatus::Idle {
            return false;
        }
        self.status = SessionStatus::Idle;
        true
    }

    pub fn apply(&mut self, incoming: IncomingEvent, connection_id: Uuid) -> Applied {
        if self.status.is_terminal() {
            return Applied::Rejected;
        }

        self.last_seq += 1;
        let event = Event::from_incoming(self.last_seq, incoming, connection_id);

        if !event.is_system() {
            self.active_stage = Some(event.agent.clone());
        }

        let target = match event.kind {
            EventKind::Plan => {
                if let Some(plan) = Plan::from_event(&event) {
                    self.plan = Some(plan);
                }
                None
            }
            EventKind::Scene => {
                if let Some(payload) = event.metadata.get("scene") {
                    self.scenes.push(Scene {
                        seq: event.seq,
                        agent: event.agent.clone(),
                        payload: payload.clone(),
                    });
                } else if event.is_system() {
                    self.capture_final_output(&event);
                }
                None
            }
            EventKind::Complete => {
                self.capture_final_output(&event);
                event.is_system().then_some(SessionStatus::Complete)
            }
            EventKind::Status => Some(SessionStatus::Running),
            EventKind::Error => Some(SessionStatus::Error),
            EventKind::Thought
            | EventKind::Action
            | EventKind::Observation
            | EventKind::MemoryUpdate
            | EventKind::RagResult => None,
        };

        let status_change = target.filter(|next| self.advance_status(*next));
        self.events.push(event.clone());

        Applied::Appended {
            event,
            status_change,
        }
    }

    fn capture_final_output(&mut self, event: &Event) {
        let Some(output) = FinalOutput::from_event(event) else {
            return;
        };
        if self.final_outputs.iter().any(|existing| existing.text == output.text) {
            tracing::debug!(seq = event.seq, "duplicate final output suppressed");
            return;
        }
        self.final_outputs.push(output);
    }
}
