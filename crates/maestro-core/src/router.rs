//! Router - delegation decisions and the agent turn loop
//!
//! The router decides, per task, whether the calling agent hands control to
//! a transfer target, invokes a sub-agent as a callable sub-routine, or
//! executes its own model/tool turn. Every model call and tool call made on
//! any path first passes through the callback pipeline; a blocked verdict
//! short-circuits into `DelegationResult::Escalated("policy_violation")`
//! without touching the model or tool.

use crate::callbacks::CallbackPipeline;
use crate::error::{Error, Result};
use crate::event::{EventKind, EventLog};
use crate::registry::{AgentDescriptor, AgentRegistry, DelegationKind, DelegationTarget};
use crate::session::SessionStore;
use crate::util::{retry_with_backoff, RetryConfig};
use async_trait::async_trait;
use maestro_llm::{Message, ModelProvider, ModelRequest, ModelResponse, ToolSchema};
use maestro_tools::ToolRunner;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One unit of delegated work. Created per delegation hop and immutable
/// once created.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique task id
    pub id: Uuid,
    /// Session the task belongs to
    pub session_id: String,
    /// Opaque structured payload
    pub payload: serde_json::Value,
    /// Tags matched against capability tags for transfer routing
    pub tags: Vec<String>,
    /// Agent (or "user") the task originated from
    pub originating_agent: String,
    /// Event this task is causally linked to
    pub parent_event_id: Option<Uuid>,
}

impl Task {
    /// Create a root task. Tags are read from the payload's `"tags"` array
    /// when present.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        payload: serde_json::Value,
        originating_agent: impl Into<String>,
    ) -> Self {
        let tags = payload
            .get("tags")
            .and_then(|t| t.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            payload,
            tags,
            originating_agent: originating_agent.into(),
            parent_event_id: None,
        }
    }

    /// Link the task to the event that caused it
    #[must_use]
    pub fn with_parent(mut self, parent_event_id: Uuid) -> Self {
        self.parent_event_id = Some(parent_event_id);
        self
    }

    /// Derive a task for a delegation hop, keeping the payload
    #[must_use]
    pub fn child(&self, originating_agent: &str, parent_event_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: self.session_id.clone(),
            payload: self.payload.clone(),
            tags: self.tags.clone(),
            originating_agent: originating_agent.to_string(),
            parent_event_id,
        }
    }

    /// Derive a task with a replaced payload (e.g. tool-call arguments for
    /// an invoked sub-agent)
    #[must_use]
    pub fn child_with_payload(
        &self,
        originating_agent: &str,
        payload: serde_json::Value,
        parent_event_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: self.session_id.clone(),
            payload,
            tags: Vec::new(),
            originating_agent: originating_agent.to_string(),
            parent_event_id,
        }
    }

    /// Text form of the payload used as the opening user message
    #[must_use]
    pub fn text(&self) -> String {
        match &self.payload {
            serde_json::Value::String(s) => s.clone(),
            other => other
                .get("text")
                .and_then(|t| t.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        }
    }
}

/// Outcome of one delegation decision. Exactly one variant per decision.
#[derive(Debug, Clone)]
pub enum DelegationResult {
    /// Control passed to another agent; the caller's turn is over
    Transferred {
        /// Agent now holding the turn
        to: String,
    },
    /// A sub-agent ran as a sub-routine; the caller keeps the turn
    Invoked {
        /// The sub-routine's result
        value: serde_json::Value,
    },
    /// The agent completed its work
    Completed {
        /// Final value
        value: serde_json::Value,
    },
    /// Execution was blocked or the agent signalled early exit
    Escalated {
        /// Machine-readable reason
        reason: String,
    },
}

/// Executes an agent of any kind to a terminal result, following transfer
/// hops. Implemented by the workflow engine; the router calls back through
/// this seam when a turn invokes a sub-agent.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run the agent until it completes, escalates, or fails
    async fn execute(
        &self,
        agent: &AgentDescriptor,
        task: Task,
        cancel: &CancellationToken,
    ) -> Result<DelegationResult>;
}

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum model/tool passes per agent turn
    pub max_iterations: usize,
    /// Deadline per model call in milliseconds
    pub model_timeout_ms: u64,
    /// Bail out of a turn after this many consecutive all-failed tool passes
    pub max_consecutive_tool_failures: usize,
    /// Retry policy for transient model failures
    pub retry: RetryConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            model_timeout_ms: 60_000,
            max_consecutive_tool_failures: 2,
            retry: RetryConfig::default(),
        }
    }
}

/// Routes tasks between agents and drives model-backed turns
pub struct DelegationRouter {
    registry: Arc<AgentRegistry>,
    pipeline: Arc<CallbackPipeline>,
    provider: Arc<dyn ModelProvider>,
    runner: Arc<ToolRunner>,
    sessions: Arc<SessionStore>,
    events: Arc<EventLog>,
    config: RouterConfig,
}

impl DelegationRouter {
    /// Create a router
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AgentRegistry>,
        pipeline: Arc<CallbackPipeline>,
        provider: Arc<dyn ModelProvider>,
        runner: Arc<ToolRunner>,
        sessions: Arc<SessionStore>,
        events: Arc<EventLog>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            pipeline,
            provider,
            runner,
            sessions,
            events,
            config,
        }
    }

    /// Decide and execute one delegation step for `caller`.
    ///
    /// Transfer targets whose capability tags match the task win the hop
    /// without a model call; a target declared under both kinds is routed
    /// as an invoke, the control-preserving path.
    pub async fn route(
        &self,
        task: Task,
        caller: &AgentDescriptor,
        exec: &dyn AgentExecutor,
        cancel: &CancellationToken,
    ) -> Result<DelegationResult> {
        if let Some(target) = self.matching_target(caller, &task) {
            let target_agent = self.registry.resolve(&target.agent)?;
            let event = self
                .events
                .emit(
                    &task.session_id,
                    EventKind::Delegation,
                    json!({
                        "from": caller.name,
                        "to": target.agent,
                        "kind": target.kind.as_str(),
                        "task_id": task.id,
                    }),
                    task.parent_event_id,
                )
                .await;
            info!(
                from = %caller.name,
                to = %target.agent,
                kind = %target.kind,
                "Delegating task"
            );
            return match target.kind {
                DelegationKind::Transfer => Ok(DelegationResult::Transferred {
                    to: target.agent.clone(),
                }),
                DelegationKind::Invoke => {
                    let child = task.child(&caller.name, Some(event.id));
                    match exec.execute(&target_agent, child, cancel).await? {
                        DelegationResult::Completed { value }
                        | DelegationResult::Invoked { value } => {
                            Ok(DelegationResult::Invoked { value })
                        }
                        other => Ok(other),
                    }
                }
            };
        }
        self.run_turn(caller, &task, exec, cancel).await
    }

    /// First sub-agent whose capability tags intersect the task tags, in
    /// declared order. If the winner is a transfer edge but the same agent
    /// is also declared invocable, the invoke edge takes precedence.
    fn matching_target<'a>(
        &self,
        caller: &'a AgentDescriptor,
        task: &Task,
    ) -> Option<&'a DelegationTarget> {
        if task.tags.is_empty() {
            return None;
        }
        let matches = |target: &DelegationTarget| {
            self.registry
                .resolve(&target.agent)
                .map(|agent| {
                    agent
                        .capability_tags
                        .iter()
                        .any(|tag| task.tags.contains(tag))
                })
                .unwrap_or(false)
        };
        let first = caller.sub_agents.iter().find(|t| matches(t))?;
        if first.kind == DelegationKind::Transfer {
            if let Some(invoke) = caller
                .sub_agents
                .iter()
                .find(|t| t.agent == first.agent && t.kind == DelegationKind::Invoke)
            {
                return Some(invoke);
            }
        }
        Some(first)
    }

    /// Run one model-backed agent turn: bounded model/tool passes until the
    /// model produces a final response.
    pub async fn run_turn(
        &self,
        agent: &AgentDescriptor,
        task: &Task,
        exec: &dyn AgentExecutor,
        cancel: &CancellationToken,
    ) -> Result<DelegationResult> {
        let session = self.sessions.session(&task.session_id);
        let schemas = self.tool_schemas(agent);
        let mut messages = vec![Message::user(task.text())];
        let mut final_response = String::new();
        let mut consecutive_all_fail = 0_usize;
        let mut last_tool_error: Option<Error> = None;

        for iteration in 1..=self.config.max_iterations {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if consecutive_all_fail >= self.config.max_consecutive_tool_failures {
                warn!(
                    agent = %agent.name,
                    consecutive_all_fail,
                    "Too many consecutive all-failed tool passes, surfacing failure"
                );
                return Err(last_tool_error
                    .unwrap_or_else(|| Error::Internal("tool failure without error".to_string())));
            }

            let request = ModelRequest::new(messages.clone())
                .with_instructions(agent.instruction.clone())
                .with_tools(schemas.clone());

            let (response, call_event_id) = match self.pipeline.run_before_model(&request).await {
                Ok(Some(substitute)) => {
                    let event = self
                        .events
                        .emit(
                            &task.session_id,
                            EventKind::ModelCall,
                            json!({"agent": agent.name, "iteration": iteration, "substituted": true}),
                            task.parent_event_id,
                        )
                        .await;
                    (substitute, event.id)
                }
                Ok(None) => {
                    let event = self
                        .events
                        .emit(
                            &task.session_id,
                            EventKind::ModelCall,
                            json!({"agent": agent.name, "iteration": iteration}),
                            task.parent_event_id,
                        )
                        .await;
                    let response = self.call_model(request).await?;
                    self.events
                        .emit(
                            &task.session_id,
                            EventKind::ModelResponse,
                            json!({
                                "agent": agent.name,
                                "model": response.model,
                                "final": response.is_final(),
                            }),
                            Some(event.id),
                        )
                        .await;
                    (response, event.id)
                }
                Err(Error::PolicyViolation { reason }) => {
                    return Ok(self.blocked(task, &agent.name, &reason).await);
                }
                Err(e) => return Err(e),
            };

            let response = match self.pipeline.run_after_model(response).await {
                Ok(r) => r,
                Err(Error::PolicyViolation { reason }) => {
                    return Ok(self.blocked(task, &agent.name, &reason).await);
                }
                Err(e) => return Err(e),
            };

            if let Some(content) = &response.content {
                if !content.is_empty() {
                    final_response = content.clone();
                }
            }

            if response.is_final() {
                let value = serde_json::Value::String(final_response);
                if let Some(key) = &agent.output_key {
                    session.set(key, value.clone(), &agent.name).await;
                    self.events
                        .emit(
                            &task.session_id,
                            EventKind::StateWrite,
                            json!({"key": key, "writer": agent.name}),
                            Some(call_event_id),
                        )
                        .await;
                }
                debug!(agent = %agent.name, iterations = iteration, "Turn completed");
                return Ok(DelegationResult::Completed { value });
            }

            messages.push(Message::assistant_with_tool_calls(
                response.content.clone().unwrap_or_default(),
                response.requested_tool_calls.clone(),
            ));

            let mut fail_count = 0_usize;
            let executed = response.requested_tool_calls.len();
            for call in &response.requested_tool_calls {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let outcome = self
                    .dispatch_tool_call(agent, task, call, call_event_id, exec, cancel)
                    .await?;
                let result_value = match outcome {
                    ToolOutcome::Result(value) => value,
                    ToolOutcome::Failed(value, error) => {
                        fail_count += 1;
                        last_tool_error = Some(error);
                        value
                    }
                    ToolOutcome::Escalated(result) => return Ok(result),
                };
                let rendered = serde_json::to_string(&result_value)
                    .unwrap_or_else(|_| result_value.to_string());
                messages.push(Message::tool_response(&call.id, rendered));
            }

            if executed > 0 && fail_count == executed {
                consecutive_all_fail += 1;
            } else {
                consecutive_all_fail = 0;
            }
        }

        warn!(
            agent = %agent.name,
            max_iterations = self.config.max_iterations,
            "Turn hit the iteration bound"
        );
        Ok(DelegationResult::Completed {
            value: serde_json::Value::String(final_response),
        })
    }

    /// Dispatch one tool call: an invoke-declared sub-agent runs as a
    /// sub-routine, anything else goes through the before/after tool chains
    /// and the runner.
    async fn dispatch_tool_call(
        &self,
        agent: &AgentDescriptor,
        task: &Task,
        call: &maestro_llm::ToolCall,
        turn_event_id: Uuid,
        exec: &dyn AgentExecutor,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome> {
        if let Some(target) = agent
            .sub_agents
            .iter()
            .find(|t| t.kind == DelegationKind::Invoke && t.agent == call.name)
        {
            let sub_agent = self.registry.resolve(&target.agent)?;
            let event = self
                .events
                .emit(
                    &task.session_id,
                    EventKind::ToolCall,
                    json!({
                        "agent": agent.name,
                        "tool": call.name,
                        "target": target.agent,
                        "delegation": "invoke",
                    }),
                    Some(turn_event_id),
                )
                .await;
            let child = task.child_with_payload(&agent.name, call.arguments.clone(), Some(event.id));
            return match exec.execute(&sub_agent, child, cancel).await? {
                DelegationResult::Completed { value } | DelegationResult::Invoked { value } => {
                    self.events
                        .emit(
                            &task.session_id,
                            EventKind::ToolResult,
                            json!({"agent": target.agent, "tool": call.name, "success": true}),
                            Some(event.id),
                        )
                        .await;
                    Ok(ToolOutcome::Result(value))
                }
                DelegationResult::Escalated { reason } => {
                    Ok(ToolOutcome::Escalated(DelegationResult::Escalated { reason }))
                }
                DelegationResult::Transferred { to } => Err(Error::Internal(format!(
                    "invoked sub-agent '{to}' escaped as a transfer"
                ))),
            };
        }

        match self.pipeline.run_before_tool(&call.name, &call.arguments).await {
            Ok(Some(substitute)) => {
                let event = self
                    .events
                    .emit(
                        &task.session_id,
                        EventKind::ToolCall,
                        json!({
                            "agent": agent.name,
                            "tool": call.name,
                            "substituted": true,
                        }),
                        Some(turn_event_id),
                    )
                    .await;
                let result = self.finish_tool(task, agent, call, substitute, true, event.id).await?;
                Ok(result)
            }
            Ok(None) => {
                let event = self
                    .events
                    .emit(
                        &task.session_id,
                        EventKind::ToolCall,
                        json!({"agent": agent.name, "tool": call.name}),
                        Some(turn_event_id),
                    )
                    .await;
                match self.runner.execute(&call.name, call.arguments.clone()).await {
                    Ok(execution) => {
                        let result = self
                            .finish_tool(task, agent, call, execution.output, true, event.id)
                            .await?;
                        Ok(result)
                    }
                    Err(e) => {
                        warn!(agent = %agent.name, tool = %call.name, error = %e, "Tool call failed");
                        let payload = json!({"status": "error", "error": e.to_string()});
                        let result = self
                            .finish_tool(task, agent, call, payload, false, event.id)
                            .await?;
                        match result {
                            ToolOutcome::Result(value) => {
                                Ok(ToolOutcome::Failed(value, Error::Tool(e)))
                            }
                            other => Ok(other),
                        }
                    }
                }
            }
            Err(Error::PolicyViolation { reason }) => {
                Ok(ToolOutcome::Escalated(self.blocked(task, &agent.name, &reason).await))
            }
            Err(e) => Err(e),
        }
    }

    /// Run the after-tool chain and emit the result event.
    async fn finish_tool(
        &self,
        task: &Task,
        agent: &AgentDescriptor,
        call: &maestro_llm::ToolCall,
        result: serde_json::Value,
        success: bool,
        call_event_id: Uuid,
    ) -> Result<ToolOutcome> {
        let result = match self.pipeline.run_after_tool(&call.name, result).await {
            Ok(r) => r,
            Err(Error::PolicyViolation { reason }) => {
                return Ok(ToolOutcome::Escalated(
                    self.blocked(task, &agent.name, &reason).await,
                ));
            }
            Err(e) => return Err(e),
        };
        self.events
            .emit(
                &task.session_id,
                EventKind::ToolResult,
                json!({"agent": agent.name, "tool": call.name, "success": success}),
                Some(call_event_id),
            )
            .await;
        Ok(ToolOutcome::Result(result))
    }

    /// Emit the policy-block audit event and build the synthetic result.
    async fn blocked(&self, task: &Task, agent: &str, reason: &str) -> DelegationResult {
        warn!(agent, reason, "Call blocked by policy");
        self.events
            .emit(
                &task.session_id,
                EventKind::PolicyBlocked,
                json!({"agent": agent, "reason": reason}),
                task.parent_event_id,
            )
            .await;
        DelegationResult::Escalated {
            reason: "policy_violation".to_string(),
        }
    }

    /// Schemas offered to the model: the sealed tool alone when one is
    /// declared, otherwise the agent's tools plus its invocable sub-agents.
    fn tool_schemas(&self, agent: &AgentDescriptor) -> Vec<ToolSchema> {
        if let Some(exclusive) = &agent.exclusive_tool {
            return self.runner.registry().schemas_for(&[exclusive.clone()]);
        }
        let mut schemas = self.runner.registry().schemas_for(&agent.tools);
        for target in &agent.sub_agents {
            if target.kind != DelegationKind::Invoke {
                continue;
            }
            if let Ok(sub) = self.registry.resolve(&target.agent) {
                schemas.push(ToolSchema::new(sub.name.clone(), sub.description.clone()));
            }
        }
        schemas
    }

    async fn call_model(&self, request: ModelRequest) -> Result<ModelResponse> {
        let timeout = Duration::from_millis(self.config.model_timeout_ms);
        let timeout_ms = self.config.model_timeout_ms;
        retry_with_backoff(
            &self.config.retry,
            maestro_llm::Error::is_retryable,
            || {
                let request = request.clone();
                async move {
                    match tokio::time::timeout(timeout, self.provider.invoke(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(maestro_llm::Error::Timeout { timeout_ms }),
                    }
                }
            },
        )
        .await
        .map_err(Error::Model)
    }
}

enum ToolOutcome {
    Result(serde_json::Value),
    Failed(serde_json::Value, Error),
    Escalated(DelegationResult),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_tags_from_payload() {
        let task = Task::new("s1", json!({"text": "fix it", "tags": ["develop", "rust"]}), "user");
        assert_eq!(task.tags, vec!["develop", "rust"]);
        assert_eq!(task.text(), "fix it");
    }

    #[test]
    fn test_task_text_fallbacks() {
        let task = Task::new("s1", json!("plain request"), "user");
        assert_eq!(task.text(), "plain request");

        let task = Task::new("s1", json!({"code": "1+1"}), "user");
        assert_eq!(task.text(), r#"{"code":"1+1"}"#);
    }

    #[test]
    fn test_child_tasks_get_fresh_ids() {
        let task = Task::new("s1", json!({"text": "x"}), "user");
        let hop = task.child("hia", None);
        assert_ne!(task.id, hop.id);
        assert_eq!(hop.session_id, "s1");
        assert_eq!(hop.originating_agent, "hia");

        let invoked = task.child_with_payload("da", json!({"code": "y"}), Some(Uuid::new_v4()));
        assert_eq!(invoked.payload, json!({"code": "y"}));
        assert!(invoked.tags.is_empty());
    }
}
