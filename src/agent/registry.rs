//! Registry of the agents owned by a collective.

use crate::agent::core::Agent;
use crate::types::{AgentName, CollectiveError, Result};
use std::collections::HashMap;
use tracing::debug;

/// Agents in registration order, indexed by name.
#[derive(Debug, Default, Clone)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
    index: HashMap<AgentName, usize>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent.
    ///
    /// # Returns
    /// * `Ok(())` if registration succeeds
    /// * `Err(RegistrationConflict)` if an agent with the same name exists
    /// * `Err(InvalidAgent)` if the descriptor is malformed
    pub fn register(&mut self, agent: Agent) -> Result<()> {
        agent.spec().validate()?;

        let name = agent.owned_name();
        if self.index.contains_key(&name) {
            return Err(CollectiveError::RegistrationConflict(name));
        }

        debug!(
            "Registered agent {} ({:?} -> {})",
            name,
            agent.spec().consumes(),
            agent.spec().produces()
        );
        self.index.insert(name, self.agents.len());
        self.agents.push(agent);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Agent> {
        self.index.get(name).map(|&i| &self.agents[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
