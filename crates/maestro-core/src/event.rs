//! Event - the canonical execution trace
//!
//! Every model call, tool call, delegation, and state mutation appends an
//! immutable `Event`. The per-session sequence is totally ordered by
//! emission and causally linked via `parent_event_id`. The log doubles as a
//! broadcast source so observers can follow a session live, and as a replay
//! buffer so a reconnecting observer can resume from any event id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Kind of orchestration step an event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A request entered the orchestrator
    SessionStarted,
    /// Control or a sub-task moved between agents
    Delegation,
    /// An outbound model call was made (or substituted by a callback)
    ModelCall,
    /// A model response was received
    ModelResponse,
    /// A tool invocation started
    ToolCall,
    /// A tool result was produced
    ToolResult,
    /// A session state key was written
    StateWrite,
    /// An artifact version was saved
    ArtifactSaved,
    /// A callback raised a policy violation mid-run
    PolicyBlocked,
    /// A single agent turn was cancelled (e.g. one parallel branch)
    TurnCancelled,
    /// A workflow pattern started
    WorkflowStarted,
    /// A workflow pattern terminated
    WorkflowTerminated,
    /// Terminal: the request completed successfully
    Completed,
    /// Terminal: the request ended blocked by policy
    Blocked,
    /// Terminal: the request failed
    Failed,
    /// Terminal: the request was cancelled
    Cancelled,
}

impl EventKind {
    /// Returns the string representation of the event kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::Delegation => "delegation",
            Self::ModelCall => "model_call",
            Self::ModelResponse => "model_response",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::StateWrite => "state_write",
            Self::ArtifactSaved => "artifact_saved",
            Self::PolicyBlocked => "policy_blocked",
            Self::TurnCancelled => "turn_cancelled",
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowTerminated => "workflow_terminated",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this kind ends a session's event sequence
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Blocked | Self::Failed | Self::Cancelled
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable record of one orchestration step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier
    pub id: Uuid,
    /// Session this event belongs to
    pub session_id: String,
    /// Kind of step
    pub kind: EventKind,
    /// Step-specific payload
    pub payload: serde_json::Value,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
    /// Causal parent, if any
    pub parent_event_id: Option<Uuid>,
}

impl Event {
    /// Create a new event
    #[must_use]
    pub fn new(session_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            kind,
            payload: serde_json::json!({}),
            timestamp: Utc::now(),
            parent_event_id: None,
        }
    }

    /// Set the payload
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the causal parent
    #[must_use]
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_event_id = Some(parent_id);
        self
    }
}

/// Per-session append-only event log with broadcast fan-out.
///
/// Slow live subscribers miss events (lagged) rather than blocking the
/// publisher; the replay buffer is the source of truth.
pub struct EventLog {
    sessions: RwLock<HashMap<String, Vec<Event>>>,
    sender: broadcast::Sender<Event>,
}

impl EventLog {
    /// Create a log with the given broadcast capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sessions: RwLock::new(HashMap::new()),
            sender,
        }
    }

    /// Append an event and broadcast it. Returns the stored event so the
    /// caller can link children to it.
    pub async fn append(&self, event: Event) -> Event {
        {
            let mut sessions = self.sessions.write().await;
            sessions
                .entry(event.session_id.clone())
                .or_default()
                .push(event.clone());
        }
        // send() errors when there are no live subscribers, which is fine
        let _ = self.sender.send(event.clone());
        event
    }

    /// Build and append an event in one step
    pub async fn emit(
        &self,
        session_id: &str,
        kind: EventKind,
        payload: serde_json::Value,
        parent: Option<Uuid>,
    ) -> Event {
        let mut event = Event::new(session_id, kind).with_payload(payload);
        if let Some(p) = parent {
            event = event.with_parent(p);
        }
        self.append(event).await
    }

    /// All events for a session, in emission order
    pub async fn events(&self, session_id: &str) -> Vec<Event> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned().unwrap_or_default()
    }

    /// Events after the given id. `None` (or an id not present in the log)
    /// replays from the beginning.
    pub async fn events_since(&self, session_id: &str, after: Option<Uuid>) -> Vec<Event> {
        let sessions = self.sessions.read().await;
        let Some(events) = sessions.get(session_id) else {
            return Vec::new();
        };
        match after.and_then(|id| events.iter().position(|e| e.id == id)) {
            Some(idx) => events[idx + 1..].to_vec(),
            None => events.clone(),
        }
    }

    /// Subscribe to all future events across sessions
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Open a replay-then-live stream for one session, resuming after the
    /// given event id.
    pub async fn stream(&self, session_id: &str, after: Option<Uuid>) -> EventStream {
        // Subscribe before snapshotting so nothing emitted in between is lost.
        let rx = self.subscribe();
        let buffered = self.events_since(session_id, after).await;
        let seen: HashSet<Uuid> = buffered.iter().map(|e| e.id).collect();
        let done = buffered.iter().any(|e| e.kind.is_terminal());
        EventStream {
            session_id: session_id.to_string(),
            buffered: buffered.into(),
            seen,
            rx,
            done,
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Lazy event sequence for one session: replays buffered events, then yields
/// live events until the session's terminal event, then ends.
pub struct EventStream {
    session_id: String,
    buffered: VecDeque<Event>,
    seen: HashSet<Uuid>,
    rx: broadcast::Receiver<Event>,
    done: bool,
}

impl EventStream {
    /// Next event, or `None` once the terminal event has been yielded.
    pub async fn next(&mut self) -> Option<Event> {
        if let Some(event) = self.buffered.pop_front() {
            return Some(event);
        }
        if self.done {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.session_id != self.session_id || self.seen.contains(&event.id) {
                        continue;
                    }
                    if event.kind.is_terminal() {
                        self.done = true;
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
