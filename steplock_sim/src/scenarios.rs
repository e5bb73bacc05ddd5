//! Deterministic simulation scenarios.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// SIM-001: Viewers chat with several agents; displayed == stored
    Conversation,

    /// SIM-002: One session far past the history cap
    HistoryCap,

    /// SIM-003: Agents registered and unregistered under load
    AgentChurn,

    /// SIM-004: Walking directives against live and dead actors
    Movement,

    /// SIM-005: Long random scripts across many replicas
    Convergence,

    /// SIM-006: Concurrent producers racing the step drain
    ConcurrentFeed,

    /// SIM-007: Save mid-run, keep going, reload
    SaveReload,

    /// SIM-008: Observation-only mode blocks viewer submits
    ObserverMode,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Conversation,
            ScenarioId::HistoryCap,
            ScenarioId::AgentChurn,
            ScenarioId::Movement,
            ScenarioId::Convergence,
            ScenarioId::ConcurrentFeed,
            ScenarioId::SaveReload,
            ScenarioId::ObserverMode,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Conversation => "conversation",
            ScenarioId::HistoryCap => "history_cap",
            ScenarioId::AgentChurn => "agent_churn",
            ScenarioId::Movement => "movement",
            ScenarioId::Convergence => "convergence",
            ScenarioId::ConcurrentFeed => "concurrent_feed",
            ScenarioId::SaveReload => "save_reload",
            ScenarioId::ObserverMode => "observer_mode",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Conversation => "Random chat across viewers and agents, mirror must match the store",
            ScenarioId::HistoryCap => "Overflow one session, keep exactly the newest messages",
            ScenarioId::AgentChurn => "Register/unregister storm, registry never empties",
            ScenarioId::Movement => "Set/stop directives, stop-once semantics, dead actors skipped",
            ScenarioId::Convergence => "Long random script, every replica digest identical every step",
            ScenarioId::ConcurrentFeed => "Tokio producers append while steps drain, no loss or reorder",
            ScenarioId::SaveReload => "Snapshot mid-run, reload restores persisted state only",
            ScenarioId::ObserverMode => "Observer mode refuses viewer submits and reaches late joiners",
        }
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        ScenarioId::all()
            .into_iter()
            .find(|id| id.name() == normalized)
            .ok_or_else(|| format!("Unknown scenario: {}", s))
    }
}
