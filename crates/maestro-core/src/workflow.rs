//! Workflow - structured multi-agent execution patterns
//!
//! A workflow runs a declared set of sub-agents under one of three fixed
//! disciplines (bounded loop, strict sequence, concurrent fan-out) or a
//! caller-supplied custom controller. Loop and Sequential execute one agent
//! turn at a time; Parallel runs independent turns that share the session's
//! state and artifact stores, with per-branch failure containment.

use crate::error::{Error, Result};
use crate::event::{EventKind, EventLog};
use crate::registry::{AgentDescriptor, AgentKind, AgentRegistry};
use crate::router::{AgentExecutor, DelegationResult, DelegationRouter, Task};
use crate::session::{SessionState, SessionStore};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Predicate evaluated against a session state snapshot after each full
/// loop pass
pub type TerminationPredicate =
    dyn Fn(&HashMap<String, serde_json::Value>) -> bool + Send + Sync;

/// Caller-supplied controller for workflows that do not fit the three
/// fixed shapes
#[async_trait]
pub trait WorkflowController: Send + Sync {
    /// Drive the workflow. May call the router directly through the context.
    async fn run(&self, ctx: ControllerContext<'_>) -> Result<serde_json::Value>;
}

/// Everything a custom controller may touch
pub struct ControllerContext<'a> {
    /// Declared sub-agent names
    pub sub_agents: &'a [String],
    /// Shared session state
    pub session: Arc<SessionState>,
    /// The task driving this workflow
    pub task: &'a Task,
    /// Delegation router for direct routing decisions
    pub router: &'a DelegationRouter,
    /// Executor for running sub-agents to completion
    pub executor: &'a dyn AgentExecutor,
    /// Cancellation signal
    pub cancel: &'a CancellationToken,
}

/// Declared composition of agents. Immutable once a run starts.
#[derive(Clone)]
pub enum WorkflowSpec {
    /// Bounded iterative refinement
    Loop {
        /// Sub-agents run in order each pass
        sub_agents: Vec<String>,
        /// Hard bound on full passes; zero is invalid
        max_iterations: usize,
        /// Optional predicate checked after each full pass
        until: Option<Arc<TerminationPredicate>>,
    },
    /// Strict in-order pipeline
    Sequential {
        /// Sub-agents run in order, once
        sub_agents: Vec<String>,
    },
    /// Concurrent fan-out/gather
    Parallel {
        /// Sub-agents started together
        sub_agents: Vec<String>,
    },
    /// Caller-supplied orchestration
    Custom {
        /// Sub-agents available to the controller
        sub_agents: Vec<String>,
        /// The controller itself
        controller: Arc<dyn WorkflowController>,
    },
}

impl WorkflowSpec {
    /// Loop over sub-agents up to `max_iterations` passes
    #[must_use]
    pub fn looping(sub_agents: Vec<String>, max_iterations: usize) -> Self {
        Self::Loop {
            sub_agents,
            max_iterations,
            until: None,
        }
    }

    /// Loop with a termination predicate
    #[must_use]
    pub fn looping_until(
        sub_agents: Vec<String>,
        max_iterations: usize,
        until: Arc<TerminationPredicate>,
    ) -> Self {
        Self::Loop {
            sub_agents,
            max_iterations,
            until: Some(until),
        }
    }

    /// Run sub-agents strictly in order
    #[must_use]
    pub fn sequential(sub_agents: Vec<String>) -> Self {
        Self::Sequential { sub_agents }
    }

    /// Run sub-agents concurrently
    #[must_use]
    pub fn parallel(sub_agents: Vec<String>) -> Self {
        Self::Parallel { sub_agents }
    }

    /// Hand control to a custom controller
    #[must_use]
    pub fn custom(sub_agents: Vec<String>, controller: Arc<dyn WorkflowController>) -> Self {
        Self::Custom {
            sub_agents,
            controller,
        }
    }

    /// The declared sub-agent names
    #[must_use]
    pub fn sub_agents(&self) -> &[String] {
        match self {
            Self::Loop { sub_agents, .. }
            | Self::Sequential { sub_agents }
            | Self::Parallel { sub_agents }
            | Self::Custom { sub_agents, .. } => sub_agents,
        }
    }

    /// Pattern name for events and logs
    #[must_use]
    pub fn pattern(&self) -> &'static str {
        match self {
            Self::Loop { .. } => "loop",
            Self::Sequential { .. } => "sequential",
            Self::Parallel { .. } => "parallel",
            Self::Custom { .. } => "custom",
        }
    }

    /// Validate the spec before a run
    pub fn validate(&self) -> Result<()> {
        if let Self::Loop { max_iterations, .. } = self {
            if *max_iterations == 0 {
                return Err(Error::InvalidWorkflowSpec(
                    "max_iterations must be at least 1".to_string(),
                ));
            }
        }
        if self.sub_agents().is_empty() && !matches!(self, Self::Custom { .. }) {
            return Err(Error::InvalidWorkflowSpec(
                "at least one sub-agent is required".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for WorkflowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loop {
                sub_agents,
                max_iterations,
                until,
            } => f
                .debug_struct("Loop")
                .field("sub_agents", sub_agents)
                .field("max_iterations", max_iterations)
                .field("until", &until.is_some())
                .finish(),
            Self::Sequential { sub_agents } => f
                .debug_struct("Sequential")
                .field("sub_agents", sub_agents)
                .finish(),
            Self::Parallel { sub_agents } => f
                .debug_struct("Parallel")
                .field("sub_agents", sub_agents)
                .finish(),
            Self::Custom { sub_agents, .. } => f
                .debug_struct("Custom")
                .field("sub_agents", sub_agents)
                .finish(),
        }
    }
}

/// Why a loop terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The termination predicate held
    PredicateSatisfied,
    /// A sub-agent escalated
    EarlyExit,
    /// The iteration bound was reached
    MaxIterations,
}

/// Outcome of one branch of a parallel workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum BranchResult {
    /// The branch completed with a value
    Success(serde_json::Value),
    /// The branch failed; the reason is preserved
    Failed(String),
    /// The branch was cancelled before completing
    Cancelled,
}

/// A named branch outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchOutcome {
    /// Sub-agent name
    pub agent: String,
    /// What happened to the branch
    pub result: BranchResult,
}

/// Result of a workflow run
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    /// Aggregated value (pattern-dependent)
    pub value: serde_json::Value,
    /// Full passes (loop) or agent turns executed
    pub iterations: usize,
    /// Loop termination reason, when applicable
    pub reason: Option<TerminationReason>,
    /// Per-branch outcomes (parallel only)
    pub branches: Vec<BranchOutcome>,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline per agent turn (loop/sequential) or per parallel group
    pub workflow_timeout_ms: u64,
    /// Cancel remaining parallel branches on the first failure
    pub parallel_cancel_on_first_failure: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workflow_timeout_ms: 120_000,
            parallel_cancel_on_first_failure: false,
        }
    }
}

const MAX_TRANSFER_HOPS: usize = 16;

/// Runs workflow patterns over the delegation router
pub struct WorkflowEngine {
    router: Arc<DelegationRouter>,
    registry: Arc<AgentRegistry>,
    sessions: Arc<SessionStore>,
    events: Arc<EventLog>,
    config: EngineConfig,
}

impl WorkflowEngine {
    /// Create an engine
    #[must_use]
    pub fn new(
        router: Arc<DelegationRouter>,
        registry: Arc<AgentRegistry>,
        sessions: Arc<SessionStore>,
        events: Arc<EventLog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            router,
            registry,
            sessions,
            events,
            config,
        }
    }

    /// The router this engine delegates through
    #[must_use]
    pub fn router(&self) -> &Arc<DelegationRouter> {
        &self.router
    }

    /// Run a workflow spec for a task.
    ///
    /// Spec validation and sub-agent resolution failures are fatal and
    /// reported synchronously.
    pub async fn run_workflow(
        &self,
        spec: &WorkflowSpec,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome> {
        spec.validate()?;
        let agents: Vec<Arc<AgentDescriptor>> = spec
            .sub_agents()
            .iter()
            .map(|name| self.registry.resolve(name))
            .collect::<Result<_>>()?;

        let started = self
            .events
            .emit(
                &task.session_id,
                EventKind::WorkflowStarted,
                json!({"pattern": spec.pattern(), "sub_agents": spec.sub_agents()}),
                task.parent_event_id,
            )
            .await;
        info!(
            pattern = spec.pattern(),
            sub_agents = ?spec.sub_agents(),
            "Workflow started"
        );

        let outcome = match spec {
            WorkflowSpec::Loop {
                max_iterations,
                until,
                ..
            } => {
                self.run_loop(&agents, *max_iterations, until.as_deref(), task, cancel)
                    .await
            }
            WorkflowSpec::Sequential { .. } => self.run_sequential(&agents, task, cancel).await,
            WorkflowSpec::Parallel { .. } => self.run_parallel(&agents, task, cancel).await,
            WorkflowSpec::Custom { controller, .. } => {
                self.run_custom(spec.sub_agents(), controller.as_ref(), task, cancel)
                    .await
            }
        }?;

        self.events
            .emit(
                &task.session_id,
                EventKind::WorkflowTerminated,
                json!({
                    "pattern": spec.pattern(),
                    "iterations": outcome.iterations,
                    "reason": outcome.reason,
                    "branches": outcome.branches,
                }),
                Some(started.id),
            )
            .await;
        Ok(outcome)
    }

    async fn run_loop(
        &self,
        agents: &[Arc<AgentDescriptor>],
        max_iterations: usize,
        until: Option<&TerminationPredicate>,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome> {
        let session = self.sessions.session(&task.session_id);
        let mut last_value = serde_json::Value::Null;
        let mut iterations = 0;
        let mut reason = TerminationReason::MaxIterations;

        'passes: for iteration in 1..=max_iterations {
            iterations = iteration;
            for agent in agents {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let child = task.child("loop", task.parent_event_id);
                match self.run_bounded(agent, child, cancel).await? {
                    DelegationResult::Completed { value }
                    | DelegationResult::Invoked { value } => last_value = value,
                    DelegationResult::Escalated { reason: why } => {
                        debug!(agent = %agent.name, reason = %why, "Loop sub-agent escalated");
                        reason = TerminationReason::EarlyExit;
                        break 'passes;
                    }
                    DelegationResult::Transferred { to } => {
                        return Err(Error::Internal(format!(
                            "transfer to '{to}' escaped a loop turn"
                        )));
                    }
                }
            }
            if let Some(predicate) = until {
                let snapshot = session.snapshot().await;
                if predicate(&snapshot) {
                    reason = TerminationReason::PredicateSatisfied;
                    break;
                }
            }
        }

        Ok(WorkflowOutcome {
            value: last_value,
            iterations,
            reason: Some(reason),
            branches: Vec::new(),
        })
    }

    async fn run_sequential(
        &self,
        agents: &[Arc<AgentDescriptor>],
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome> {
        let mut last_value = serde_json::Value::Null;
        let mut executed = 0;

        for agent in agents {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            executed += 1;
            let child = task.child("sequential", task.parent_event_id);
            match self.run_bounded(agent, child, cancel).await? {
                DelegationResult::Completed { value } | DelegationResult::Invoked { value } => {
                    last_value = value;
                }
                DelegationResult::Escalated { reason } => {
                    // a blocked stage aborts the remaining sequence
                    return Err(Error::PolicyViolation { reason });
                }
                DelegationResult::Transferred { to } => {
                    return Err(Error::Internal(format!(
                        "transfer to '{to}' escaped a sequential turn"
                    )));
                }
            }
        }

        Ok(WorkflowOutcome {
            value: last_value,
            iterations: executed,
            reason: None,
            branches: Vec::new(),
        })
    }

    async fn run_parallel(
        &self,
        agents: &[Arc<AgentDescriptor>],
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome> {
        let group = cancel.child_token();
        let results: Arc<Mutex<HashMap<String, BranchResult>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let branches: FuturesUnordered<_> = agents
            .iter()
            .map(|agent| {
                let agent = Arc::clone(agent);
                let child = task.child("parallel", task.parent_event_id);
                let group = group.clone();
                async move {
                    let result = self.execute(&agent, child, &group).await;
                    (agent.name.clone(), result)
                }
            })
            .collect();

        let collect = {
            let results = Arc::clone(&results);
            let group = group.clone();
            async move {
                let mut branches = branches;
                while let Some((name, result)) = branches.next().await {
                    let branch = match result {
                        Ok(DelegationResult::Completed { value })
                        | Ok(DelegationResult::Invoked { value }) => BranchResult::Success(value),
                        Ok(DelegationResult::Escalated { reason }) => BranchResult::Failed(reason),
                        Ok(DelegationResult::Transferred { to }) => {
                            BranchResult::Failed(format!("unexpected transfer to '{to}'"))
                        }
                        Err(Error::Cancelled) => BranchResult::Cancelled,
                        Err(e) => BranchResult::Failed(e.to_string()),
                    };
                    let failed = matches!(branch, BranchResult::Failed(_));
                    results.lock().expect("poisoned").insert(name.clone(), branch);
                    if failed {
                        warn!(agent = %name, "Parallel branch failed");
                        if self.config.parallel_cancel_on_first_failure {
                            group.cancel();
                        }
                    }
                }
            }
        };

        let deadline = Duration::from_millis(self.config.workflow_timeout_ms);
        if tokio::time::timeout(deadline, collect).await.is_err() {
            warn!(
                timeout_ms = self.config.workflow_timeout_ms,
                "Parallel workflow timed out, cancelling remaining branches"
            );
            group.cancel();
        }

        let mut collected = results.lock().expect("poisoned").clone();
        let mut value_map = serde_json::Map::new();
        let mut branches = Vec::new();
        for agent in agents {
            let branch = collected
                .remove(&agent.name)
                .unwrap_or(BranchResult::Cancelled);
            if branch == BranchResult::Cancelled {
                self.events
                    .emit(
                        &task.session_id,
                        EventKind::TurnCancelled,
                        json!({"agent": agent.name}),
                        task.parent_event_id,
                    )
                    .await;
            }
            value_map.insert(
                agent.name.clone(),
                match &branch {
                    BranchResult::Success(value) => value.clone(),
                    BranchResult::Failed(reason) => json!({"error": reason}),
                    BranchResult::Cancelled => json!({"cancelled": true}),
                },
            );
            branches.push(BranchOutcome {
                agent: agent.name.clone(),
                result: branch,
            });
        }

        Ok(WorkflowOutcome {
            value: serde_json::Value::Object(value_map),
            iterations: 1,
            reason: None,
            branches,
        })
    }

    async fn run_custom(
        &self,
        sub_agents: &[String],
        controller: &dyn WorkflowController,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome> {
        let ctx = ControllerContext {
            sub_agents,
            session: self.sessions.session(&task.session_id),
            task,
            router: &self.router,
            executor: self,
            cancel,
        };
        let value = controller.run(ctx).await?;
        Ok(WorkflowOutcome {
            value,
            iterations: 1,
            reason: None,
            branches: Vec::new(),
        })
    }

    /// One agent turn bounded by the workflow timeout. A timeout aborts the
    /// current turn only and surfaces as a workflow failure.
    async fn run_bounded(
        &self,
        agent: &AgentDescriptor,
        task: Task,
        cancel: &CancellationToken,
    ) -> Result<DelegationResult> {
        let deadline = Duration::from_millis(self.config.workflow_timeout_ms);
        // dispatch through the trait so the recursive future is boxed
        match tokio::time::timeout(deadline, self.execute(agent, task, cancel)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(agent = %agent.name, timeout_ms = self.config.workflow_timeout_ms, "Agent turn timed out");
                Err(Error::Cancelled)
            }
        }
    }

    /// Execute an agent, following transfer hops until a terminal result.
    async fn execute_inner(
        &self,
        agent: &AgentDescriptor,
        task: Task,
        cancel: &CancellationToken,
    ) -> Result<DelegationResult> {
        let mut current: Arc<AgentDescriptor> = match self.registry.resolve(&agent.name) {
            Ok(registered) => registered,
            Err(_) => Arc::new(agent.clone()),
        };
        let mut task = task;

        for _ in 0..MAX_TRANSFER_HOPS {
            if let AgentKind::Workflow(spec) = &current.kind {
                let spec = spec.clone();
                let outcome = self.run_workflow(&spec, &task, cancel).await?;
                return Ok(DelegationResult::Completed {
                    value: outcome.value,
                });
            }
            match self.router.route(task.clone(), &current, self, cancel).await? {
                DelegationResult::Transferred { to } => {
                    task = task.child(&current.name, task.parent_event_id);
                    current = self.registry.resolve(&to)?;
                }
                other => return Ok(other),
            }
        }
        Err(Error::Internal("transfer hop limit exceeded".to_string()))
    }
}

#[async_trait]
impl AgentExecutor for WorkflowEngine {
    async fn execute(
        &self,
        agent: &AgentDescriptor,
        task: Task,
        cancel: &CancellationToken,
    ) -> Result<DelegationResult> {
        self.execute_inner(agent, task, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_spec_rejects_zero_iterations() {
        let spec = WorkflowSpec::looping(vec!["a".to_string()], 0);
        assert!(matches!(
            spec.validate(),
            Err(Error::InvalidWorkflowSpec(_))
        ));
    }

    #[test]
    fn test_specs_reject_empty_sub_agents() {
        assert!(WorkflowSpec::sequential(Vec::new()).validate().is_err());
        assert!(WorkflowSpec::parallel(Vec::new()).validate().is_err());
        assert!(WorkflowSpec::looping(Vec::new(), 3).validate().is_err());
    }

    #[test]
    fn test_pattern_names() {
        assert_eq!(WorkflowSpec::sequential(vec!["a".into()]).pattern(), "sequential");
        assert_eq!(WorkflowSpec::parallel(vec!["a".into()]).pattern(), "parallel");
        assert_eq!(WorkflowSpec::looping(vec!["a".into()], 2).pattern(), "loop");
    }

    #[test]
    fn test_spec_debug_shows_predicate_presence() {
        let spec = WorkflowSpec::looping_until(
            vec!["a".to_string()],
            3,
            Arc::new(|state| state.contains_key("done")),
        );
        let rendered = format!("{spec:?}");
        assert!(rendered.contains("until: true"));
    }

    #[test]
    fn test_branch_result_serialization() {
        let branch = BranchOutcome {
            agent: "a".to_string(),
            result: BranchResult::Failed("model error".to_string()),
        };
        let rendered = serde_json::to_string(&branch).unwrap();
        assert!(rendered.contains("\"status\":\"failed\""));
        assert!(rendered.contains("model error"));
    }
}
