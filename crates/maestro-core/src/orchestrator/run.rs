//! Submit/cancel entry points and the result handle
//!
//! `submit` is non-blocking: it resolves the initial agent, spawns the
//! drive loop, and returns a handle the caller can await while following
//! the session's event stream.

use crate::error::{Error, Result};
use crate::event::{EventKind, EventLog, EventStream};
use crate::router::{AgentExecutor, DelegationResult, Task};
use crate::workflow::{WorkflowOutcome, WorkflowSpec};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::core::Orchestrator;

/// Terminal status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The request completed successfully
    Completed,
    /// The request was blocked by policy
    Blocked,
    /// The request failed
    Failed,
    /// The request was cancelled
    Cancelled,
}

/// Terminal outcome of a request
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Request identifier
    pub request_id: Uuid,
    /// Session the request ran in
    pub session_id: String,
    /// Terminal status
    pub status: RunStatus,
    /// Final value, when one was produced
    pub value: Option<serde_json::Value>,
    /// Machine-readable reason code
    pub reason: String,
}

/// Handle to a submitted request
#[derive(Debug)]
pub struct ResultHandle {
    /// Request identifier, usable with `Orchestrator::cancel`
    pub request_id: Uuid,
    /// Session the request runs in
    pub session_id: String,
    rx: oneshot::Receiver<RunOutcome>,
}

impl ResultHandle {
    /// Wait for the request's terminal outcome
    pub async fn await_result(self) -> Result<RunOutcome> {
        self.rx
            .await
            .map_err(|_| Error::Internal("orchestrator task dropped before completion".to_string()))
    }
}

impl Orchestrator {
    /// Submit a request. Non-blocking: the returned handle resolves when
    /// the session's terminal event has been emitted.
    ///
    /// Fails synchronously with `UnknownAgent` if `initial_agent` is not
    /// registered.
    #[tracing::instrument(skip(self, payload), fields(session_id = %session_id, agent = %initial_agent))]
    pub async fn submit(
        &self,
        session_id: &str,
        initial_agent: &str,
        payload: serde_json::Value,
    ) -> Result<ResultHandle> {
        let agent = self.registry.resolve(initial_agent)?;
        let request_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.active.insert(request_id, cancel.clone());

        let started = self
            .events
            .emit(
                session_id,
                EventKind::SessionStarted,
                json!({"agent": initial_agent, "request_id": request_id}),
                None,
            )
            .await;
        info!(request_id = %request_id, "Request submitted");

        let task = Task::new(session_id, payload, "user").with_parent(started.id);
        let engine = Arc::clone(&self.engine);
        let events = Arc::clone(&self.events);
        let active = Arc::clone(&self.active);
        let sid = session_id.to_string();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = engine.execute(&agent, task, &cancel).await;
            let outcome = finish(&events, &sid, request_id, result).await;
            active.remove(&request_id);
            // receiver may have been dropped; the event log still has the trace
            let _ = tx.send(outcome);
        });

        Ok(ResultHandle {
            request_id,
            session_id: session_id.to_string(),
            rx,
        })
    }

    /// Event stream for a session: replays everything emitted so far, then
    /// follows live events until the terminal event.
    pub async fn events(&self, session_id: &str) -> EventStream {
        self.events.stream(session_id, None).await
    }

    /// Event stream resuming after a known event id, for reconnecting
    /// observers.
    pub async fn events_since(&self, session_id: &str, after: Uuid) -> EventStream {
        self.events.stream(session_id, Some(after)).await
    }

    /// Run a workflow spec directly and wait for its outcome.
    pub async fn run_workflow(
        &self,
        session_id: &str,
        spec: &WorkflowSpec,
        payload: serde_json::Value,
    ) -> Result<WorkflowOutcome> {
        let task = Task::new(session_id, payload, "user");
        let cancel = CancellationToken::new();
        self.engine.run_workflow(spec, &task, &cancel).await
    }
}

/// Map a drive-loop result to the terminal event and outcome.
async fn finish(
    events: &EventLog,
    session_id: &str,
    request_id: Uuid,
    result: Result<DelegationResult>,
) -> RunOutcome {
    let (status, value, reason, kind, detail) = match result {
        Ok(DelegationResult::Completed { value }) | Ok(DelegationResult::Invoked { value }) => (
            RunStatus::Completed,
            Some(value),
            "success".to_string(),
            EventKind::Completed,
            None,
        ),
        Ok(DelegationResult::Escalated { reason }) => (
            RunStatus::Blocked,
            None,
            reason,
            EventKind::Blocked,
            None,
        ),
        Ok(DelegationResult::Transferred { to }) => (
            RunStatus::Failed,
            None,
            "internal_error".to_string(),
            EventKind::Failed,
            Some(format!("unresolved transfer to '{to}'")),
        ),
        Err(Error::Cancelled) => (
            RunStatus::Cancelled,
            None,
            "cancelled".to_string(),
            EventKind::Cancelled,
            None,
        ),
        Err(Error::PolicyViolation { reason }) => (
            RunStatus::Blocked,
            None,
            "policy_violation".to_string(),
            EventKind::Blocked,
            Some(reason),
        ),
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Request failed");
            (
                RunStatus::Failed,
                None,
                e.code().to_string(),
                EventKind::Failed,
                Some(e.to_string()),
            )
        }
    };

    let mut payload = json!({"request_id": request_id, "reason": reason});
    if let Some(detail) = &detail {
        payload["detail"] = json!(detail);
    }
    events.emit(session_id, kind, payload, None).await;

    RunOutcome {
        request_id,
        session_id: session_id.to_string(),
        status,
        value,
        reason,
    }
}
