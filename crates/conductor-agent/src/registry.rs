use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;

/// Static identity and capability set of one agent.
///
/// Specs are long-lived, shared entities. A mission only ever references an
/// agent by id; the agent's dynamic state during a mission is tracked by the
/// mission state store, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Role description passed to the completion service as context.
    pub role: String,
    /// Capability tags used for task matching.
    pub capabilities: BTreeSet<String>,
}

impl AgentSpec {
    /// Create a new agent spec with the given name, role, and capability tags.
    pub fn new<I, S>(name: impl Into<String>, role: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role: role.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether this agent's capabilities cover every required tag.
    pub fn covers(&self, required: &BTreeSet<String>) -> bool {
        required.iter().all(|cap| self.capabilities.contains(cap))
    }
}

/// Insertion-ordered registry of available agents.
///
/// Read-only during a mission: the delegator takes one snapshot via [`list`]
/// at delegation time and later registrations do not affect that mission.
/// Registration order is the deterministic tie-break for delegation.
///
/// [`list`]: AgentRegistry::list
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: Vec<AgentSpec>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Registration order is preserved.
    pub fn register(&mut self, agent: AgentSpec) -> Uuid {
        let id = agent.id;
        info!(agent = %agent.name, role = %agent.role, "Registered agent");
        self.agents.push(agent);
        id
    }

    /// Look up an agent by id.
    pub fn get(&self, id: Uuid) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Snapshot of all agents in registration order.
    pub fn list(&self) -> Vec<AgentSpec> {
        self.agents.clone()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let mut registry = AgentRegistry::new();
        let id = registry.register(AgentSpec::new("Ada", "researcher", ["research"]));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(id).unwrap().name, "Ada");
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let mut registry = AgentRegistry::new();
        registry.register(AgentSpec::new("first", "writer", ["writing"]));
        registry.register(AgentSpec::new("second", "coder", ["coding"]));
        let agents = registry.list();
        let names: Vec<&str> = agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_covers_superset_match() {
        let agent = AgentSpec::new("poly", "generalist", ["writing", "coding", "review"]);
        let required: BTreeSet<String> = ["writing".to_string(), "review".to_string()].into();
        assert!(agent.covers(&required));

        let missing: BTreeSet<String> = ["deploy".to_string()].into();
        assert!(!agent.covers(&missing));
    }

    #[test]
    fn test_covers_empty_requirement() {
        let agent = AgentSpec::new("any", "worker", ["x"]);
        assert!(agent.covers(&BTreeSet::new()));
    }
}
