//! Registry - agent descriptors and registration
//!
//! Agents are registered once at startup and treated as read-only
//! thereafter. Registration enforces the exclusive-tool constraint and
//! rejects cyclic sub-agent graphs, so runtime delegation can assume a DAG.

use crate::error::{Error, Result};
use crate::workflow::WorkflowSpec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// How a sub-agent delegation behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationKind {
    /// Control-passing hand-off; the caller does not automatically resume
    Transfer,
    /// Result-returning call; the caller resumes with the result
    Invoke,
}

impl DelegationKind {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Invoke => "invoke",
        }
    }
}

impl std::fmt::Display for DelegationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A declared delegation edge to a registered agent
#[derive(Debug, Clone)]
pub struct DelegationTarget {
    /// Target agent name
    pub agent: String,
    /// Declared delegation behavior
    pub kind: DelegationKind,
}

/// What kind of executor an agent is
#[derive(Debug, Clone)]
pub enum AgentKind {
    /// Model-backed agent executing turns through the delegation router
    Llm,
    /// Structural agent wrapping sub-agents in a workflow pattern
    Workflow(WorkflowSpec),
}

/// Immutable description of one agent
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    /// Unique agent name
    pub name: String,
    /// Description used when the agent is exposed as a callable tool
    pub description: String,
    /// System instruction for model-backed turns
    pub instruction: String,
    /// Capability tags used for transfer routing
    pub capability_tags: Vec<String>,
    /// Tools this agent may call
    pub tools: Vec<String>,
    /// Sealed tool that cannot be combined with any other tool
    pub exclusive_tool: Option<String>,
    /// Declared delegation edges, in priority order
    pub sub_agents: Vec<DelegationTarget>,
    /// Session state key the agent's final value is written to
    pub output_key: Option<String>,
    /// Executor kind
    pub kind: AgentKind,
}

impl AgentDescriptor {
    /// Create a model-backed agent
    #[must_use]
    pub fn llm(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            instruction: String::new(),
            capability_tags: Vec::new(),
            tools: Vec::new(),
            exclusive_tool: None,
            sub_agents: Vec::new(),
            output_key: None,
            kind: AgentKind::Llm,
        }
    }

    /// Create a structural workflow agent
    #[must_use]
    pub fn workflow(
        name: impl Into<String>,
        description: impl Into<String>,
        spec: WorkflowSpec,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            instruction: String::new(),
            capability_tags: Vec::new(),
            tools: Vec::new(),
            exclusive_tool: None,
            sub_agents: Vec::new(),
            output_key: None,
            kind: AgentKind::Workflow(spec),
        }
    }

    /// Set the system instruction
    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Add a capability tag
    #[must_use]
    pub fn with_capability_tag(mut self, tag: impl Into<String>) -> Self {
        self.capability_tags.push(tag.into());
        self
    }

    /// Set the callable tools
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the sealed exclusive tool
    #[must_use]
    pub fn with_exclusive_tool(mut self, tool: impl Into<String>) -> Self {
        self.exclusive_tool = Some(tool.into());
        self
    }

    /// Declare a delegation edge
    #[must_use]
    pub fn with_sub_agent(mut self, agent: impl Into<String>, kind: DelegationKind) -> Self {
        self.sub_agents.push(DelegationTarget {
            agent: agent.into(),
            kind,
        });
        self
    }

    /// Set the output key
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Sub-agent names referenced by this descriptor (delegation edges plus
    /// workflow members)
    fn referenced_agents(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sub_agents.iter().map(|t| t.agent.as_str()).collect();
        if let AgentKind::Workflow(spec) = &self.kind {
            names.extend(spec.sub_agents().iter().map(String::as_str));
        }
        names
    }
}

/// In-memory agent registry, populated once at startup
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentDescriptor>>,
}

impl AgentRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent.
    ///
    /// Fails with `DuplicateAgent` if the name is taken, with
    /// `InvalidToolConfiguration` if an exclusive tool is combined with any
    /// other tool, and with `CyclicAgentGraph` if the sub-agent graph would
    /// contain a cycle.
    pub fn register(&mut self, descriptor: AgentDescriptor) -> Result<()> {
        if self.agents.contains_key(&descriptor.name) {
            return Err(Error::DuplicateAgent {
                name: descriptor.name,
            });
        }
        if descriptor.exclusive_tool.is_some() && !descriptor.tools.is_empty() {
            return Err(Error::InvalidToolConfiguration {
                agent: descriptor.name,
                reason: "an exclusive tool cannot be combined with other tools".to_string(),
            });
        }
        self.check_acyclic(&descriptor)?;

        debug!(agent = %descriptor.name, "Agent registered");
        self.agents
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Resolve an agent by name
    pub fn resolve(&self, name: &str) -> Result<Arc<AgentDescriptor>> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownAgent {
                name: name.to_string(),
            })
    }

    /// Registered agent names, sorted
    #[must_use]
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// DFS over the sub-agent graph including the candidate descriptor.
    /// Edges to not-yet-registered names are ignored; they cannot close a
    /// cycle until the referenced agent is itself registered.
    fn check_acyclic(&self, candidate: &AgentDescriptor) -> Result<()> {
        let mut stack: Vec<&str> = vec![candidate.name.as_str()];
        let mut on_path: HashSet<&str> = HashSet::new();
        self.dfs(candidate, &mut stack, &mut on_path)
    }

    fn dfs<'a>(
        &'a self,
        node: &'a AgentDescriptor,
        stack: &mut Vec<&'a str>,
        visited: &mut HashSet<&'a str>,
    ) -> Result<()> {
        for child in node.referenced_agents() {
            if stack.contains(&child) {
                return Err(Error::CyclicAgentGraph {
                    agent: child.to_string(),
                });
            }
            if !visited.insert(child) {
                continue;
            }
            if let Some(descriptor) = self.agents.get(child) {
                stack.push(child);
                self.dfs(descriptor, stack, visited)?;
                stack.pop();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = AgentRegistry::new();
        registry
            .register(AgentDescriptor::llm("cea", "executes code"))
            .unwrap();

        let agent = registry.resolve("cea").unwrap();
        assert_eq!(agent.name, "cea");
        assert!(matches!(
            registry.resolve("nope"),
            Err(Error::UnknownAgent { .. })
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = AgentRegistry::new();
        registry
            .register(AgentDescriptor::llm("cea", "executes code"))
            .unwrap();
        let err = registry
            .register(AgentDescriptor::llm("cea", "again"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateAgent { name } if name == "cea"));
    }

    #[test]
    fn test_exclusive_tool_forbids_other_tools() {
        let mut registry = AgentRegistry::new();
        let descriptor = AgentDescriptor::llm("cea", "executes code")
            .with_exclusive_tool("sandbox_exec")
            .with_tools(vec!["http_get".to_string()]);
        let err = registry.register(descriptor).unwrap_err();
        assert!(matches!(err, Error::InvalidToolConfiguration { agent, .. } if agent == "cea"));

        // an exclusive tool alone is fine
        registry
            .register(
                AgentDescriptor::llm("cea2", "executes code").with_exclusive_tool("sandbox_exec"),
            )
            .unwrap();
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut registry = AgentRegistry::new();
        let descriptor = AgentDescriptor::llm("loopy", "refers to itself")
            .with_sub_agent("loopy", DelegationKind::Invoke);
        let err = registry.register(descriptor).unwrap_err();
        assert!(matches!(err, Error::CyclicAgentGraph { .. }));
    }

    #[test]
    fn test_cycle_through_registered_agents_rejected() {
        let mut registry = AgentRegistry::new();
        registry
            .register(AgentDescriptor::llm("a", "a").with_sub_agent("b", DelegationKind::Invoke))
            .unwrap();
        // b -> a closes the cycle a -> b -> a
        let err = registry
            .register(AgentDescriptor::llm("b", "b").with_sub_agent("a", DelegationKind::Transfer))
            .unwrap_err();
        assert!(matches!(err, Error::CyclicAgentGraph { .. }));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut registry = AgentRegistry::new();
        registry.register(AgentDescriptor::llm("leaf", "leaf")).unwrap();
        registry
            .register(AgentDescriptor::llm("left", "l").with_sub_agent("leaf", DelegationKind::Invoke))
            .unwrap();
        registry
            .register(AgentDescriptor::llm("right", "r").with_sub_agent("leaf", DelegationKind::Invoke))
            .unwrap();
        registry
            .register(
                AgentDescriptor::llm("root", "root")
                    .with_sub_agent("left", DelegationKind::Invoke)
                    .with_sub_agent("right", DelegationKind::Invoke),
            )
            .unwrap();
    }

    #[test]
    fn test_workflow_members_participate_in_cycle_check() {
        let mut registry = AgentRegistry::new();
        registry
            .register(AgentDescriptor::llm("a", "a").with_sub_agent("pipeline", DelegationKind::Invoke))
            .unwrap();
        let spec = WorkflowSpec::sequential(vec!["a".to_string()]);
        let err = registry
            .register(AgentDescriptor::workflow("pipeline", "p", spec))
            .unwrap_err();
        assert!(matches!(err, Error::CyclicAgentGraph { .. }));
    }
}
