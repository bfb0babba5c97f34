use opscrew_core::{Agent, AgentId, OpsCrewError, OpsCrewResult, PermissionSet};
use std::collections::HashMap;
use tracing::debug;

/// The fixed set of agents known to an execution.
///
/// Agents are kept in registration order, which is also the tie-break order
/// whenever several agents qualify for the same capability.
#[derive(Debug, Default, Clone)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
    index: HashMap<AgentId, usize>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from `agents`, registering them in iteration order.
    pub fn with_agents(agents: impl IntoIterator<Item = Agent>) -> OpsCrewResult<Self> {
        let mut registry = Self::new();
        for agent in agents {
            registry.register(agent)?;
        }
        Ok(registry)
    }

    /// Add an agent. Fails with `DuplicateAgent` if the identity is taken.
    pub fn register(&mut self, agent: Agent) -> OpsCrewResult<()> {
        if self.index.contains_key(&agent.id) {
            return Err(OpsCrewError::DuplicateAgent(agent.id));
        }
        debug!(agent = %agent.id, role = %agent.role, "registry: agent registered");
        self.index.insert(agent.id.clone(), self.agents.len());
        self.agents.push(agent);
        Ok(())
    }

    /// The agent registered as `id`.
    pub fn get(&self, id: &AgentId) -> Option<&Agent> {
        self.index.get(id).map(|&i| &self.agents[i])
    }

    /// Like [`AgentRegistry::get`], failing with `UnknownAgent`.
    pub fn require(&self, id: &AgentId) -> OpsCrewResult<&Agent> {
        self.get(id)
            .ok_or_else(|| OpsCrewError::UnknownAgent(id.clone()))
    }

    /// Agents holding `tag`, in registration order.
    pub fn find_by_capability(&self, tag: &str) -> Vec<&Agent> {
        self.agents.iter().filter(|a| a.has_capability(tag)).collect()
    }

    /// Agents holding every tag in `required`, in registration order.
    pub fn find_capable(&self, required: &[String]) -> Vec<&Agent> {
        self.agents.iter().filter(|a| a.has_all(required)).collect()
    }

    /// Permissions of `id`. Unknown ids are `AgentNotFound`.
    pub fn permissions_of(&self, id: &AgentId) -> OpsCrewResult<&PermissionSet> {
        self.require(id).map(|a| &a.permissions)
    }

    /// All agents in registration order.
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
