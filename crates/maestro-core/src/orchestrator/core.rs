//! Orchestrator core structure
//!
//! Contains the `Orchestrator` struct and its wiring. The registry,
//! callback pipeline, and stores are fixed at construction; the router and
//! engine are rebuilt whenever the pipeline changes.

use crate::artifacts::ArtifactStore;
use crate::callbacks::CallbackPipeline;
use crate::event::EventLog;
use crate::registry::AgentRegistry;
use crate::router::DelegationRouter;
use crate::session::{SessionState, SessionStore};
use crate::workflow::WorkflowEngine;
use dashmap::DashMap;
use maestro_llm::ModelProvider;
use maestro_tools::{RunnerConfig, ToolRegistry, ToolRunner};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::config::OrchestratorConfig;

/// Main orchestrator facade
pub struct Orchestrator {
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) pipeline: Arc<CallbackPipeline>,
    pub(crate) provider: Arc<dyn ModelProvider>,
    pub(crate) runner: Arc<ToolRunner>,
    pub(crate) sessions: Arc<SessionStore>,
    pub(crate) artifacts: Arc<ArtifactStore>,
    pub(crate) events: Arc<EventLog>,
    pub(crate) engine: Arc<WorkflowEngine>,
    /// Active requests with cancellation tokens
    pub(crate) active: Arc<DashMap<Uuid, CancellationToken>>,
    pub(crate) config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create a new orchestrator over a populated agent registry
    #[must_use]
    pub fn new(
        registry: AgentRegistry,
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        let registry = Arc::new(registry);
        let pipeline = Arc::new(CallbackPipeline::new());
        let runner = Arc::new(ToolRunner::new(tools, RunnerConfig::default()));
        let sessions = Arc::new(SessionStore::new());
        let artifacts = Arc::new(ArtifactStore::new());
        let events = Arc::new(EventLog::default());
        let engine = Self::build_engine(
            &registry, &pipeline, &provider, &runner, &sessions, &events, &config,
        );

        Self {
            registry,
            pipeline,
            provider,
            runner,
            sessions,
            artifacts,
            events,
            engine,
            active: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Install a callback pipeline, rewiring the router and engine
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: CallbackPipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self.engine = Self::build_engine(
            &self.registry,
            &self.pipeline,
            &self.provider,
            &self.runner,
            &self.sessions,
            &self.events,
            &self.config,
        );
        self
    }

    fn build_engine(
        registry: &Arc<AgentRegistry>,
        pipeline: &Arc<CallbackPipeline>,
        provider: &Arc<dyn ModelProvider>,
        runner: &Arc<ToolRunner>,
        sessions: &Arc<SessionStore>,
        events: &Arc<EventLog>,
        config: &OrchestratorConfig,
    ) -> Arc<WorkflowEngine> {
        let router = Arc::new(DelegationRouter::new(
            Arc::clone(registry),
            Arc::clone(pipeline),
            Arc::clone(provider),
            Arc::clone(runner),
            Arc::clone(sessions),
            Arc::clone(events),
            config.router_config(),
        ));
        Arc::new(WorkflowEngine::new(
            router,
            Arc::clone(registry),
            Arc::clone(sessions),
            Arc::clone(events),
            config.engine_config(),
        ))
    }

    /// The agent registry
    #[must_use]
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// The event log
    #[must_use]
    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// The artifact store for this orchestrator
    #[must_use]
    pub fn artifact_store(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// The workflow engine
    #[must_use]
    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Shared state for a session, created on first use
    #[must_use]
    pub fn session_state(&self, session_id: &str) -> Arc<SessionState> {
        self.sessions.session(session_id)
    }

    /// Save an artifact version, recording it in the session's event trace
    /// when the scope is session-bound.
    pub async fn save_artifact(
        &self,
        scope: crate::artifacts::ArtifactScope,
        name: &str,
        content: Vec<u8>,
        metadata: serde_json::Value,
    ) -> u64 {
        let version = self
            .artifacts
            .save(scope.clone(), name, content, metadata)
            .await;
        if let crate::artifacts::ArtifactScope::Session(session_id) = &scope {
            self.events
                .emit(
                    session_id,
                    crate::event::EventKind::ArtifactSaved,
                    serde_json::json!({"name": name, "version": version}),
                    None,
                )
                .await;
        }
        version
    }

    /// Number of requests currently executing
    #[must_use]
    pub fn active_request_count(&self) -> usize {
        self.active.len()
    }

    /// Cancel an active request. Cancellation is cooperative: an external
    /// call already in flight may complete and its result is discarded.
    pub fn cancel(&self, request_id: Uuid) -> bool {
        if let Some((_, token)) = self.active.remove(&request_id) {
            token.cancel();
            info!(request_id = %request_id, "Request cancelled");
            true
        } else {
            false
        }
    }
}
