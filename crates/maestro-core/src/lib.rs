//! Maestro Core - Orchestration Engine
//!
//! This crate provides the control plane that coordinates model-backed agents
//! to jointly service a request:
//! - Registry: agent descriptors, capability tags, and delegation targets
//! - Router: transfer vs invoke delegation and the bounded agent turn loop
//! - Workflow: loop, sequential, parallel, and custom execution patterns
//! - Callbacks: the guardrail pipeline gating every model and tool call
//! - Session: shared last-writer-wins state with full write history
//! - Artifacts: versioned blob storage scoped to a session or user
//! - Orchestrator: the facade that accepts requests and emits the event trace

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod artifacts;
pub mod callbacks;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod session;
pub mod util;
pub mod workflow;

pub use artifacts::{Artifact, ArtifactScope, ArtifactStore, ArtifactSummary};
pub use callbacks::{
    AfterModelHook, AfterToolHook, BeforeModelHook, BeforeToolHook, CallbackPipeline,
    InputGuardrail, ToolArgumentGuardrail,
};
pub use error::{Error, Result};
pub use event::{Event, EventKind, EventLog, EventStream};
pub use orchestrator::{Orchestrator, OrchestratorConfig, ResultHandle, RunOutcome, RunStatus};
pub use registry::{AgentDescriptor, AgentKind, AgentRegistry, DelegationKind, DelegationTarget};
pub use router::{AgentExecutor, DelegationResult, DelegationRouter, RouterConfig, Task};
pub use session::{SessionState, SessionStore, StateWrite};
pub use util::{retry_with_backoff, RetryConfig};
pub use workflow::{
    BranchOutcome, BranchResult, ControllerContext, EngineConfig, TerminationReason,
    WorkflowController, WorkflowEngine, WorkflowOutcome, WorkflowSpec,
};
