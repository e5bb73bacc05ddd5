//! Agent registry: which agents exist and how they are labelled.

use serde::{Deserialize, Serialize};
use steplock_env::AgentId;

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub label: String,
}

/// Outcome of `AgentRegistry::register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The id was new and has been appended.
    Added,
    /// The id existed; its label changed.
    Relabeled,
    /// The id existed with the same label.
    Unchanged,
}

/// Outcome of `AgentRegistry::unregister`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// The agent was removed.
    Removed(Agent),
    /// The agent is the only one left and was kept.
    Refused,
    /// No agent with that id.
    Unknown,
}

/// Ordered set of agents, in registration order.
///
/// Once the first agent is registered the registry never becomes empty
/// again: removing the sole remaining agent is refused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an agent. Idempotent by id: an existing agent only has its
    /// label updated. A missing label defaults to the id.
    pub fn register(&mut self, id: AgentId, label: Option<String>) -> Registration {
        match self.agents.iter_mut().find(|a| a.id == id) {
            Some(existing) => match label {
                Some(label) if label != existing.label => {
                    existing.label = label;
                    Registration::Relabeled
                }
                _ => Registration::Unchanged,
            },
            None => {
                let label = label.unwrap_or_else(|| id.to_string());
                self.agents.push(Agent { id, label });
                Registration::Added
            }
        }
    }

    /// Removes an agent unless it is the last one.
    pub fn unregister(&mut self, id: &AgentId) -> Removal {
        let Some(index) = self.agents.iter().position(|a| &a.id == id) else {
            return Removal::Unknown;
        };
        if self.agents.len() == 1 {
            return Removal::Refused;
        }
        Removal::Removed(self.agents.remove(index))
    }

    /// Registers the placeholder `"default"` agent if the registry is empty.
    ///
    /// Returns true if the placeholder was created.
    pub fn ensure_placeholder(&mut self, label: &str) -> bool {
        if !self.agents.is_empty() {
            return false;
        }
        self.agents.push(Agent {
            id: AgentId::default_agent(),
            label: label.to_string(),
        });
        true
    }

    /// The first registered agent: the target of commands with no agent.
    pub fn first(&self) -> Option<&Agent> {
        self.agents.first()
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.iter().any(|a| &a.id == id)
    }

    pub fn get(&self, id: &AgentId) -> Option<&Agent> {
        self.agents.iter().find(|a| &a.id == id)
    }

    /// Display label for an agent, falling back to its id.
    pub fn label_of(&self, id: &AgentId) -> String {
        self.get(id)
            .map(|a| a.label.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &AgentId> {
        self.agents.iter().map(|a| &a.id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> AgentId {
        AgentId::parse(raw).unwrap()
    }

    #[test]
    fn test_register_is_idempotent_by_id() {
        let mut registry = AgentRegistry::new();

        assert_eq!(registry.register(id("scout"), Some("Scout".into())), Registration::Added);
        assert_eq!(registry.register(id("scout"), Some("Scout".into())), Registration::Unchanged);
        assert_eq!(registry.register(id("scout"), None), Registration::Unchanged);
        assert_eq!(registry.register(id("scout"), Some("Pathfinder".into())), Registration::Relabeled);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.label_of(&id("scout")), "Pathfinder");
    }

    #[test]
    fn test_label_defaults_to_id() {
        let mut registry = AgentRegistry::new();
        registry.register(id("doug"), None);
        assert_eq!(registry.label_of(&id("doug")), "doug");
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut registry = AgentRegistry::new();
        registry.register(id("b"), None);
        registry.register(id("a"), None);
        registry.register(id("c"), None);

        let order: Vec<_> = registry.ids().map(|a| a.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert_eq!(registry.first().unwrap().id, id("b"));
    }

    #[test]
    fn test_sole_agent_cannot_be_removed() {
        let mut registry = AgentRegistry::new();
        registry.register(id("default"), None);

        assert_eq!(registry.unregister(&id("default")), Removal::Refused);
        assert_eq!(registry.len(), 1);

        registry.register(id("scout"), None);
        assert!(matches!(registry.unregister(&id("default")), Removal::Removed(_)));

        // scout is now the sole agent and is protected the same way
        assert_eq!(registry.unregister(&id("scout")), Removal::Refused);
        assert_eq!(registry.unregister(&id("ghost")), Removal::Unknown);
    }

    #[test]
    fn test_placeholder_only_when_empty() {
        let mut registry = AgentRegistry::new();
        assert!(registry.ensure_placeholder("Claude"));
        assert!(!registry.ensure_placeholder("Claude"));
        assert_eq!(registry.first().unwrap().id, AgentId::default_agent());
        assert_eq!(registry.first().unwrap().label, "Claude");
    }
}
